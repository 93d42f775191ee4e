//! Inter-worker transport.
//!
//! Workers share no mutable state. Everything they learn about each other
//! travels as a [`Message`] over a [`Communicator`]: point-to-point `send` /
//! `recv` plus the collectives the distributed loop is built from.
//!
//! Every collective is blocking and must be called by all ranks in the same
//! order. Rank 0 owns the raster and roots the scatter, gather, broadcast and
//! reduction.

use crate::core::error::CommError;
use crate::core::types::Label;
use crossbeam::channel::{unbounded, Receiver, Sender};

/// Rank that owns the raster and roots every collective.
pub const ROOT: usize = 0;

/// A message between two workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Raster dimensions.
    Dims {
        /// Columns.
        width: usize,
        /// Rows.
        height: usize,
    },
    /// A run of pixel bytes (band or halo row).
    Pixels(Vec<u8>),
    /// A run of labels (halo row or owned band).
    Labels(Vec<Label>),
    /// A change flag.
    Flag(bool),
}

impl Message {
    /// Short name of the variant, for error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Dims { .. } => "dims",
            Message::Pixels(_) => "pixels",
            Message::Labels(_) => "labels",
            Message::Flag(_) => "flag",
        }
    }
}

fn unexpected(peer: usize, expected: &'static str, received: &Message) -> CommError {
    CommError::UnexpectedMessage {
        peer,
        expected,
        received: received.kind(),
    }
}

/// Message-passing endpoint of one worker.
///
/// Only [`send`](Communicator::send) and [`recv`](Communicator::recv) must be
/// implemented. `send` must not block on the receiver, which is what makes a
/// send followed by a receive a deadlock-free paired exchange.
pub trait Communicator: Send {
    /// This worker's rank.
    fn rank(&self) -> usize;

    /// Number of workers.
    fn size(&self) -> usize;

    /// Send a message to `dest`.
    fn send(&self, dest: usize, message: Message) -> Result<(), CommError>;

    /// Receive the next message from `src`.
    fn recv(&self, src: usize) -> Result<Message, CommError>;

    /// Whether this worker roots the collectives.
    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Paired send/receive with one peer.
    fn sendrecv(&self, peer: usize, message: Message) -> Result<Message, CommError> {
        self.send(peer, message)?;
        self.recv(peer)
    }

    /// Distribute `(width, height)` from the root to every rank.
    ///
    /// The root passes `Some`, every other rank `None`.
    fn broadcast_dims(&self, dims: Option<(usize, usize)>) -> Result<(usize, usize), CommError> {
        if self.is_root() {
            let (width, height) = dims.ok_or(CommError::MissingRootData {
                operation: "broadcast_dims",
            })?;
            for dest in (0..self.size()).filter(|&r| r != ROOT) {
                self.send(dest, Message::Dims { width, height })?;
            }
            Ok((width, height))
        } else {
            match self.recv(ROOT)? {
                Message::Dims { width, height } => Ok((width, height)),
                other => Err(unexpected(ROOT, "dims", &other)),
            }
        }
    }

    /// Hand each rank its `chunk` bytes of `data`, in rank order.
    ///
    /// The root passes `Some(data)` holding at least `chunk * size` bytes.
    fn scatter_rows(&self, data: Option<&[u8]>, chunk: usize) -> Result<Vec<u8>, CommError> {
        if self.is_root() {
            let data = data
                .filter(|d| d.len() >= chunk * self.size())
                .ok_or(CommError::MissingRootData {
                    operation: "scatter_rows",
                })?;
            for dest in (0..self.size()).filter(|&r| r != ROOT) {
                let start = dest * chunk;
                self.send(dest, Message::Pixels(data[start..start + chunk].to_vec()))?;
            }
            Ok(data[..chunk].to_vec())
        } else {
            match self.recv(ROOT)? {
                Message::Pixels(bytes) => Ok(bytes),
                other => Err(unexpected(ROOT, "pixels", &other)),
            }
        }
    }

    /// Swap one label row with `peer`.
    fn exchange_labels(&self, peer: usize, row: &[Label]) -> Result<Vec<Label>, CommError> {
        match self.sendrecv(peer, Message::Labels(row.to_vec()))? {
            Message::Labels(labels) => Ok(labels),
            other => Err(unexpected(peer, "labels", &other)),
        }
    }

    /// Swap one pixel row with `peer`.
    fn exchange_pixels(&self, peer: usize, row: &[u8]) -> Result<Vec<u8>, CommError> {
        match self.sendrecv(peer, Message::Pixels(row.to_vec()))? {
            Message::Pixels(pixels) => Ok(pixels),
            other => Err(unexpected(peer, "pixels", &other)),
        }
    }

    /// Logical OR of `flag` across all ranks; every rank gets the result.
    fn allreduce_or(&self, flag: bool) -> Result<bool, CommError> {
        if self.is_root() {
            let mut any = flag;
            for src in (0..self.size()).filter(|&r| r != ROOT) {
                match self.recv(src)? {
                    Message::Flag(f) => any |= f,
                    other => return Err(unexpected(src, "flag", &other)),
                }
            }
            for dest in (0..self.size()).filter(|&r| r != ROOT) {
                self.send(dest, Message::Flag(any))?;
            }
            Ok(any)
        } else {
            match self.sendrecv(ROOT, Message::Flag(flag))? {
                Message::Flag(any) => Ok(any),
                other => Err(unexpected(ROOT, "flag", &other)),
            }
        }
    }

    /// Collect every rank's bytes on the root, one entry per rank in rank
    /// order.
    ///
    /// Returns `Some` on the root and `None` elsewhere.
    fn gather_bytes(&self, data: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        if !self.is_root() {
            self.send(ROOT, Message::Pixels(data))?;
            return Ok(None);
        }
        let mut bands = Vec::with_capacity(self.size());
        bands.push(data);
        for src in (0..self.size()).filter(|&r| r != ROOT) {
            match self.recv(src)? {
                Message::Pixels(bytes) => bands.push(bytes),
                other => return Err(unexpected(src, "pixels", &other)),
            }
        }
        Ok(Some(bands))
    }

    /// Concatenate every rank's labels on the root, in rank order.
    fn gather_labels(&self, data: Vec<Label>) -> Result<Option<Vec<Label>>, CommError> {
        if !self.is_root() {
            self.send(ROOT, Message::Labels(data))?;
            return Ok(None);
        }
        let mut all = data;
        for src in (0..self.size()).filter(|&r| r != ROOT) {
            match self.recv(src)? {
                Message::Labels(labels) => all.extend_from_slice(&labels),
                other => return Err(unexpected(src, "labels", &other)),
            }
        }
        Ok(Some(all))
    }

    /// Block until every rank has reached this point.
    fn barrier(&self) -> Result<(), CommError> {
        self.allreduce_or(false).map(|_| ())
    }
}

/// In-process transport: one unbounded crossbeam channel per ordered pair of
/// ranks.
///
/// Dropping an endpoint disconnects its channels, so peers waiting on a
/// failed worker get [`CommError::Disconnected`] instead of hanging.
pub struct ChannelCommunicator {
    rank: usize,
    senders: Vec<Sender<Message>>,
    receivers: Vec<Receiver<Message>>,
}

impl ChannelCommunicator {
    /// Create the endpoints of a world of `size` ranks, indexed by rank.
    pub fn world(size: usize) -> Vec<ChannelCommunicator> {
        // channels[src][dest]
        let mut senders: Vec<Vec<Sender<Message>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Message>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();

        for (src, outgoing) in senders.iter_mut().enumerate() {
            for inbox in receivers.iter_mut() {
                let (tx, rx) = unbounded();
                outgoing.push(tx);
                inbox[src] = Some(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ChannelCommunicator {
                rank,
                senders,
                receivers: receivers.into_iter().flatten().collect(),
            })
            .collect()
    }

    fn check_rank(&self, rank: usize) -> Result<(), CommError> {
        if rank >= self.senders.len() {
            return Err(CommError::BadRank {
                rank,
                size: self.senders.len(),
            });
        }
        Ok(())
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dest: usize, message: Message) -> Result<(), CommError> {
        self.check_rank(dest)?;
        log::trace!("rank {} -> {}: {}", self.rank, dest, message.kind());
        self.senders[dest]
            .send(message)
            .map_err(|_| CommError::Disconnected { peer: dest })
    }

    fn recv(&self, src: usize) -> Result<Message, CommError> {
        self.check_rank(src)?;
        self.receivers[src]
            .recv()
            .map_err(|_| CommError::Disconnected { peer: src })
    }
}

impl std::fmt::Debug for ChannelCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.size())
            .finish()
    }
}
