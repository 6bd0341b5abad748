//! One client socket: buffered frames in, responses out.

use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use mio::Interest;
use mio::event::Event;
use mio::net::TcpStream;
use perfectnet_wire::{FRAME_HEADER_SIZE, Frame, MAX_PAYLOAD_SIZE, Request};
use tracing::{debug, warn};

use crate::auth::Session;
use crate::handler::RequestHandler;

const READ_CHUNK: usize = 4096;

/// Unsent response bytes a connection may hold. Past this the connection
/// stops reading and answering until the peer drains it.
pub(crate) const MAX_OUTBOUND: usize = 256 * 1024;

/// One read pass stops once a whole maximal frame is buffered.
const MAX_INBOUND: usize = FRAME_HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// What the event loop should do with a connection after servicing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Re-register with this interest.
    Keep(Interest),
    Close,
}

pub struct Connection {
    stream: TcpStream,
    inbound: BytesMut,
    outbound: BytesMut,
    /// The peer half-closed; finish writing, then drop.
    peer_closed: bool,
    last_activity: Instant,
    session: Session,
    served: u64,
}

impl Connection {
    pub fn new(stream: TcpStream, buffer_capacity: usize) -> Self {
        Self {
            stream,
            inbound: BytesMut::with_capacity(buffer_capacity),
            outbound: BytesMut::with_capacity(buffer_capacity),
            peer_closed: false,
            last_activity: Instant::now(),
            session: Session::default(),
            served: 0,
        }
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Requests answered over this connection's lifetime.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Reads what the socket has, answers complete requests, and flushes
    /// as much output as the socket takes. A peer that sends without
    /// reading is not read from again until its backlog drains.
    pub fn on_event(&mut self, event: &Event, handler: &RequestHandler) -> Disposition {
        if event.is_readable() && !self.backlogged() {
            if let Err(e) = self.fill() {
                debug!(error = %e, "read failed");
                return Disposition::Close;
            }
        }

        loop {
            let answered = match self.answer_all(handler) {
                Ok(answered) => answered,
                Err(reason) => {
                    warn!(%reason, "protocol error; dropping connection");
                    return Disposition::Close;
                }
            };
            if let Err(e) = self.flush() {
                debug!(error = %e, "write failed");
                return Disposition::Close;
            }
            // requests held back by the cap can go out now
            if answered == 0 || !self.outbound.is_empty() {
                break;
            }
        }

        disposition(self.peer_closed, self.outbound.len())
    }

    fn backlogged(&self) -> bool {
        self.outbound.len() >= MAX_OUTBOUND
    }

    /// Drains the socket into `inbound` until it would block or a maximal
    /// frame is buffered.
    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.inbound.len() < MAX_INBOUND {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    self.last_activity = Instant::now();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Answers buffered requests until none is complete or the outbound
    /// cap is reached. A bad frame desynchronizes the stream for good, so it ends the
    /// connection.
    fn answer_all(&mut self, handler: &RequestHandler) -> Result<usize, String> {
        let mut answered = 0;
        while !self.backlogged() {
            let Some(frame) = Frame::decode(&mut self.inbound).map_err(|e| e.to_string())? else {
                break;
            };
            let request = Request::from_frame(&frame).map_err(|e| e.to_string())?;
            let response = handler.handle(&mut self.session, request);
            response
                .to_frame()
                .map_err(|e| e.to_string())?
                .encode(&mut self.outbound);
            self.served += 1;
            answered += 1;
        }
        Ok(answered)
    }

    /// Writes until `outbound` is empty or the socket would block.
    fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Interest for the next poll. A full backlog waits on writability alone.
fn disposition(peer_closed: bool, pending: usize) -> Disposition {
    match (peer_closed, pending) {
        (true, 0) => Disposition::Close,
        (_, 0) => Disposition::Keep(Interest::READABLE),
        (_, n) if n >= MAX_OUTBOUND => Disposition::Keep(Interest::WRITABLE),
        _ => Disposition::Keep(Interest::READABLE | Interest::WRITABLE),
    }
}
