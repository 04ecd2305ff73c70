use std::path::PathBuf;

use argh::FromArgs;
use mpc::signing::{key_file_path, SigningIdentity};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Generate and persist a node's settlement-signing key.
#[derive(FromArgs)]
struct Options {
    /// stable node name the key file is persisted under
    #[argh(option)]
    node_name: String,

    /// directory to write the key file into
    #[argh(option, default = "String::from(\".\")")]
    output_dir: String,

    /// overwrite an existing key file for this node name
    #[argh(switch)]
    force: bool,
}

fn main() {
    let options: Options = argh::from_env();
    let dir = PathBuf::from(&options.output_dir);
    let path = key_file_path(&dir, &options.node_name);

    if path.exists() && !options.force {
        eprintln!(
            "key file already exists at {} (pass --force to overwrite)",
            path.display()
        );
        std::process::exit(1);
    }

    let mut rng = StdRng::from_entropy();
    let identity = SigningIdentity::generate(&mut rng);
    identity
        .persist(&path, &options.node_name)
        .expect("failed to write key file");

    println!(
        "generated signing key for `{}` at {}: address {}",
        options.node_name,
        path.display(),
        identity.address()
    );
}
