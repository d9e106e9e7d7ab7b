//! Hello-world HTTP responder wired onto a [`Multiplexer`].
//!
//! The listener's readable handler accepts clients and registers each of them
//! for `Readable` (answer with a fixed page) and `PeerHalfClosed | Hangup`
//! (drop the stream). The multiplexer only tracks interest: the streams are
//! owned by the client table here and closed when removed from it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use evmux_core::config::{ConfigError, ServerConfig};
use evmux_core::os::{EventKind, Multiplexer};
use evmux_core::MuxError;
use tracing::{error, info, warn};

const MAX_BUF_LENGTH: usize = 4096;

pub const HTTP_HELLO: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Length: 20\r\nContent-Type: text/html\r\n\r\n<h1>Hello world</h1>";

type Clients = Rc<RefCell<HashMap<RawFd, TcpStream>>>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("socket setup failed")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Mux(#[from] MuxError),
}

#[derive(Debug)]
pub struct HelloServer {
    mux: Multiplexer,
    local_addr: SocketAddr,
    clients: Clients,
}

impl HelloServer {
    pub fn bind(cfg: &ServerConfig) -> Result<Self, ServerError> {
        let mut mux = Multiplexer::with_config(&cfg.mux_config())?;

        let listener = TcpListener::bind((cfg.host.as_str(), cfg.port))?;
        set_backlog(&listener, cfg.backlog)?;
        let local_addr = listener.local_addr()?;
        let server_fd = listener.as_raw_fd();

        let clients = Clients::default();
        mux.add_descriptor(server_fd)?;
        let accepted = Rc::clone(&clients);
        mux.add_event_handler(server_fd, EventKind::Readable, move |mux, _| {
            accept_clients(mux, &listener, &accepted)
        })?;

        info!(fd = server_fd, %local_addr, edge_triggered = cfg.edge_triggered, "listening");
        Ok(HelloServer { mux, local_addr, clients })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.clients.borrow().len()
    }

    /// One wait-and-dispatch round.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        Ok(self.mux.wait_for_events(timeout)?)
    }

    pub fn serve(&mut self, timeout: Option<Duration>, should_stop: impl FnMut() -> bool) -> Result<(), ServerError> {
        self.mux.run_until(timeout, should_stop)?;
        Ok(())
    }
}

/// `listen(2)` again on the bound socket; Linux accepts this to change the
/// backlog of an already listening socket.
fn set_backlog(listener: &TcpListener, backlog: u32) -> io::Result<()> {
    let backlog = backlog.min(libc::c_int::MAX as u32) as libc::c_int;
    if unsafe { libc::listen(listener.as_raw_fd(), backlog) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn accept_clients(mux: &mut Multiplexer, listener: &TcpListener, clients: &Clients) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let fd = stream.as_raw_fd();
                info!(fd, %peer, "client connected");
                if let Err(e) = register_client(mux, stream, clients) {
                    error!(fd, error = %e, "cannot monitor client");
                    mux.remove_descriptor(fd);
                    clients.borrow_mut().remove(&fd);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
        // A level-triggered listener is still blocking; it reports again next turn.
        if !mux.is_edge_triggered() {
            break;
        }
    }
}

fn register_client(mux: &mut Multiplexer, stream: TcpStream, clients: &Clients) -> Result<(), MuxError> {
    let fd = stream.as_raw_fd();
    mux.add_descriptor(fd)?;
    clients.borrow_mut().insert(fd, stream);

    let readers = Rc::clone(clients);
    mux.add_event_handler(fd, EventKind::Readable, move |mux, fd| {
        on_client_data(fd, mux.is_edge_triggered(), &readers)
    })?;

    // Dropping the stream closes it; the multiplexer deregisters the fd
    // itself once this hangup-class batch entry is done.
    let closers = Rc::clone(clients);
    mux.add_event_handler(fd, EventKind::PeerHalfClosed | EventKind::Hangup, move |_, fd| {
        info!(fd, "client disconnected");
        closers.borrow_mut().remove(&fd);
    })
}

fn on_client_data(fd: RawFd, drain: bool, clients: &Clients) {
    let mut clients = clients.borrow_mut();
    let Some(stream) = clients.get_mut(&fd) else {
        return;
    };

    let mut buf = vec![0u8; MAX_BUF_LENGTH];
    let mut received = Vec::new();
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if !drain {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(fd, error = %e, "recv failed");
                return;
            }
        }
    }
    if received.is_empty() {
        return;
    }

    info!(fd, bytes = received.len(), message = %String::from_utf8_lossy(&received), "received");
    if let Err(e) = stream.write_all(HTTP_HELLO) {
        warn!(fd, error = %e, "send failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TICK: Option<Duration> = Some(Duration::from_millis(20));

    fn exchange(edge_triggered: bool) {
        let cfg = ServerConfig { port: 0, edge_triggered, ..ServerConfig::default() };
        let mut server = HelloServer::bind(&cfg).unwrap();
        let mut client = TcpStream::connect(server.local_addr()).unwrap();

        for _ in 0..100 {
            server.turn(TICK).unwrap();
            if server.client_count() == 1 {
                break;
            }
        }
        assert_eq!(server.client_count(), 1);

        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        client.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
        let mut response = Vec::new();
        let mut buf = [0u8; 256];
        for _ in 0..100 {
            server.turn(TICK).unwrap();
            if let Ok(n) = client.read(&mut buf) {
                response.extend_from_slice(&buf[..n]);
            }
            if response.len() >= HTTP_HELLO.len() {
                break;
            }
        }
        assert_eq!(response, HTTP_HELLO);

        drop(client);
        for _ in 0..100 {
            server.turn(TICK).unwrap();
            if server.client_count() == 0 {
                break;
            }
        }
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn edge_triggered_exchange() {
        exchange(true);
    }

    #[test]
    fn level_triggered_exchange() {
        exchange(false);
    }
}
