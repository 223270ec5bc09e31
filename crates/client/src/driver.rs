//! Tokio glue: a socket, a [`Connection`] and a command channel on one task.

use std::sync::Arc;

use natter_core::Command;
use natter_core::config::Config;
use natter_core::event::EventBus;
use natter_xmpp::{ConnectionError, ValidationError, XmppTransport};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::error::CommandError;

pub const DEFAULT_PORT: u16 = 5222;

const READ_BUFFER_SIZE: usize = 8192;
const COMMAND_QUEUE: usize = 64;

/// What the connection asked the socket writer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Data(Vec<u8>),
    Close,
}

/// Transport that queues writes for the driver task.
#[derive(Debug)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Outbound>,
    closed: bool,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                closed: false,
            },
            receiver,
        )
    }
}

impl XmppTransport for ChannelTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::NotConnected);
        }
        self.sender
            .send(Outbound::Data(data.to_vec()))
            .map_err(|_| ConnectionError::NotConnected)
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        if !self.closed {
            self.closed = true;
            let _ = self.sender.send(Outbound::Close);
        }
        Ok(())
    }
}

struct Request {
    command: Command,
    respond_to: oneshot::Sender<Result<(), CommandError>>,
}

/// Cloneable handle for issuing commands to a running connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    requests: mpsc::Sender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command.name())
            .finish()
    }
}

impl ClientHandle {
    pub async fn execute(&self, command: Command) -> Result<(), CommandError> {
        let (respond_to, response) = oneshot::channel();
        self.requests
            .send(Request {
                command,
                respond_to,
            })
            .await
            .map_err(|_| ConnectionError::NotConnected)?;
        response.await.map_err(|_| ConnectionError::NotConnected)?
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// Owns a connection until its socket closes.
#[derive(Debug)]
pub struct Driver {
    connection: Connection<ChannelTransport>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    requests: mpsc::Receiver<Request>,
}

/// Build a connection for `config` without touching the network.
pub fn client(
    config: &Config,
    bus: Arc<dyn EventBus>,
) -> Result<(ClientHandle, Driver), ValidationError> {
    let (transport, outbound) = ChannelTransport::new();
    let connection = Connection::new(config, transport, bus)?;
    let (sender, requests) = mpsc::channel(COMMAND_QUEUE);
    Ok((
        ClientHandle { requests: sender },
        Driver {
            connection,
            outbound,
            requests,
        },
    ))
}

impl Driver {
    pub fn connection(&self) -> &Connection<ChannelTransport> {
        &self.connection
    }

    /// Run the connection over `stream` until either side closes it.
    #[instrument(skip_all, fields(account = %self.connection.account()))]
    pub async fn run<S>(mut self, stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        self.connection.on_connected();

        loop {
            tokio::select! {
                read = reader.read(&mut buffer) => match read {
                    Ok(0) => {
                        info!("peer closed the connection");
                        self.connection.on_disconnected();
                        return Ok(());
                    }
                    Ok(n) => self.connection.on_bytes(&buffer[..n]),
                    Err(error) => {
                        warn!(error = %error, "read failed");
                        self.connection.on_disconnected();
                        return Err(ConnectionError::TransportError(error.to_string()));
                    }
                },
                Some(outbound) = self.outbound.recv() => match outbound {
                    Outbound::Data(bytes) => {
                        if let Err(error) = writer.write_all(&bytes).await {
                            warn!(error = %error, "write failed");
                            self.connection.on_disconnected();
                            return Err(ConnectionError::TransportError(error.to_string()));
                        }
                    }
                    Outbound::Close => {
                        debug!("closing socket");
                        if let Err(error) = writer.shutdown().await {
                            debug!(error = %error, "socket shutdown failed");
                        }
                        return Ok(());
                    }
                },
                Some(request) = self.requests.recv() => {
                    let result = self.connection.handle_command(request.command);
                    if request.respond_to.send(result).is_err() {
                        debug!("command caller went away");
                    }
                }
            }
        }
    }
}

/// Resolve and dial the configured server, then drive the connection on a
/// new task.
pub async fn connect(
    config: &Config,
    bus: Arc<dyn EventBus>,
) -> Result<(ClientHandle, JoinHandle<Result<(), ConnectionError>>), ConnectionError> {
    let (handle, driver) = client(config, bus)
        .map_err(|error| ConnectionError::StreamError(error.to_string()))?;

    let host = config
        .account
        .server
        .clone()
        .unwrap_or_else(|| driver.connection().account().domain().to_string());
    let port = config.account.port.unwrap_or(DEFAULT_PORT);

    info!(host = %host, port, "dialing");
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|error| ConnectionError::TransportError(error.to_string()))?;

    Ok((handle, tokio::spawn(driver.run(stream))))
}
