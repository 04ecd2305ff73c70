//! Plain TCP transport for the message bus.
//!
//! The wire contract only requires an ordered, reliable, binary, duplex
//! stream per peer pair; this core does not terminate TLS itself (see
//! DESIGN.md for why that layer was dropped from the inherited transport
//! stack). Deployments that need transport encryption should terminate it
//! outside this crate, e.g. behind a reverse proxy or an IPsec mesh.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};

use super::config::NetworkConfig;
use super::envelope::Envelope;
use super::{wrap_channel_with_bincode, BincodeStreamSink};
use crate::PartyId;

/// Delay between connection retries while a lower-id party waits for a
/// higher-id one to come up.
const CONNECTION_RETRY_DELAY: Duration = Duration::from_millis(500);

type BoxedSink = Pin<Box<dyn Sink<Envelope, Error = io::Error> + Send>>;
type BoxedStream = Pin<Box<dyn Stream<Item = io::Result<Envelope>> + Send>>;

/// Establish the full mesh of TCP connections for a three-party
/// configuration: listen for connections from lower-id parties, connect out
/// to higher-id ones. Returns one `(sink, stream)` pair per peer, indexed by
/// `party_id` (this party's own slot is `None`).
pub async fn connect_mesh(
    config: &NetworkConfig,
    party_id: PartyId,
) -> io::Result<Vec<Option<(BoxedSink, BoxedStream)>>> {
    let this_party = &config.parties[party_id];

    let listen_for = listen_for_parties(&config.parties[..party_id], this_party.address);
    let connect_to = futures::future::try_join_all(
        config.parties[party_id + 1..]
            .iter()
            .map(|peer| connect_to_party(peer.address, party_id)),
    );

    let (mut incoming, mut outgoing) = futures::try_join!(listen_for, connect_to)?;
    let mut outgoing = outgoing.drain(..);

    let mut channels: Vec<Option<(BoxedSink, BoxedStream)>> = Vec::with_capacity(config.parties.len());
    for i in 0..config.parties.len() {
        if i < party_id {
            channels.push(incoming[i].take().map(split_boxed));
        } else if i == party_id {
            channels.push(None);
        } else {
            channels.push(Some(split_boxed(outgoing.next().expect("one outgoing channel per higher-id peer"))));
        }
    }
    Ok(channels)
}

fn split_boxed(channel: BincodeStreamSink<Envelope, TcpStream>) -> (BoxedSink, BoxedStream) {
    let (sink, stream) = channel.split();
    let stream = stream.map(|item| item.map_err(to_io_error));
    let sink = sink.sink_map_err(to_io_error);
    (Box::pin(sink), Box::pin(stream))
}

fn to_io_error(error: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error.to_string())
}

/// Accept connections from every party with a lower id than us, identifying
/// each by the `u32` party id it sends as its very first bytes.
async fn listen_for_parties(
    lower_parties: &[super::config::NetworkPartyConfig],
    listen_addr: std::net::SocketAddr,
) -> io::Result<Vec<Option<BincodeStreamSink<Envelope, TcpStream>>>> {
    if lower_parties.is_empty() {
        return Ok(Vec::new());
    }

    let listener = TcpListener::bind(listen_addr).await?;
    let mut connected: Vec<Option<TcpStream>> = lower_parties.iter().map(|_| None).collect();

    while connected.iter().any(Option::is_none) {
        let (mut socket, _) = listener.accept().await?;
        use tokio::io::AsyncReadExt;
        let party_id = socket.read_u32().await? as usize;
        if party_id < connected.len() && connected[party_id].is_none() {
            connected[party_id] = Some(socket);
        }
    }

    Ok(connected
        .into_iter()
        .map(|socket| socket.map(wrap_channel_with_bincode))
        .collect())
}

/// Connect out to a party with a higher id, retrying until it accepts.
async fn connect_to_party(
    addr: std::net::SocketAddr,
    this_party_id: PartyId,
) -> io::Result<BincodeStreamSink<Envelope, TcpStream>> {
    use tokio::io::AsyncWriteExt;
    let mut socket = loop {
        match TcpStream::connect(addr).await {
            Ok(socket) => break socket,
            Err(_) => tokio::time::sleep(CONNECTION_RETRY_DELAY).await,
        }
    };
    socket.write_u32(this_party_id as u32).await?;
    socket.flush().await?;
    Ok(wrap_channel_with_bincode(socket))
}
