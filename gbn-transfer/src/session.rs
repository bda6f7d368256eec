//! Transfer sessions and the request router.
//!
//! A session binds one engine to one remote address and one local file for
//! the duration of one transfer.  Requests are plain UTF-8 datagrams:
//!
//! | Request           | Effect                                                  |
//! |-------------------|---------------------------------------------------------|
//! | `LISTAR`          | reply with the newline-joined names of stored files     |
//! | `UPLOAD <name>`   | the requester sends; the server receives into `<name>`  |
//! | `DOWNLOAD <name>` | the server sends `<name>`, or answers with ERROR        |
//!
//! The server owns a single UDP socket.  Its dispatcher forwards every
//! datagram from an address with a transfer in progress to that transfer's
//! inbox and treats everything else as a request.  Each transfer runs on its
//! own task; transfers share nothing but the storage directory, so two
//! concurrent uploads of the same name will clobber each other.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::channel::{Datagram, PeerChannel, RoutedChannel};
use crate::config::{ServerConfig, TransferConfig};
use crate::error::TransferError;
use crate::packet::{Packet, PacketType};
use crate::receiver::{self, FileSink, ReceiveReport};
use crate::sender::{self, SendReport};
use crate::socket::Socket;

/// Reply to `LISTAR` when the storage directory is empty.
pub const EMPTY_LISTING: &str = "No files available on the server.";

/// How long [`Client::list`] waits for the reply.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Datagrams queued per transfer before the dispatcher starts dropping.
const INBOX_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A parsed control datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List,
    /// `None` when the name is missing or has no usable file-name component.
    Upload(Option<String>),
    Download(Option<String>),
}

impl Request {
    /// Parse a control datagram; `None` for anything that is not a request.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?.trim();
        if text == "LISTAR" {
            return Some(Request::List);
        }
        let (verb, rest) = match text.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (text, ""),
        };
        match verb {
            "UPLOAD" => Some(Request::Upload(file_name(rest))),
            "DOWNLOAD" => Some(Request::Download(file_name(rest))),
            _ => None,
        }
    }

    /// Wire form of this request.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::List => b"LISTAR".to_vec(),
            Request::Upload(name) => format!("UPLOAD {}", name.as_deref().unwrap_or("")).into_bytes(),
            Request::Download(name) => {
                format!("DOWNLOAD {}", name.as_deref().unwrap_or("")).into_bytes()
            }
        }
    }
}

/// Final path component of `name`, so requests cannot escape the storage
/// directory.
pub fn file_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

type Routes = Arc<Mutex<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>>;

/// The file server: one socket, one task per transfer.
pub struct Server {
    socket: Arc<Socket>,
    config: ServerConfig,
    routes: Routes,
}

impl Server {
    /// Validate `config`, create the storage directory and bind the socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, TransferError> {
        config.transfer.validate()?;
        fs::create_dir_all(&config.storage_dir).await?;
        let socket = Arc::new(Socket::bind(config.bind).await?);
        log::info!(
            "[server] listening on {} serving {}",
            socket.local_addr,
            config.storage_dir.display()
        );
        Ok(Self {
            socket,
            config,
            routes: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Dispatch datagrams until the socket fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (bytes, addr) = self.socket.recv_from().await?;
            let Some(bytes) = self.route(addr, bytes).await else {
                continue;
            };
            match Request::parse(&bytes) {
                Some(request) => self.handle(request, addr).await,
                None => log::debug!("[server] ignoring stray datagram from {addr}"),
            }
        }
    }

    /// Forward to the transfer in progress with `addr`, if any.  Hands the
    /// datagram back when there is none.
    async fn route(&self, addr: SocketAddr, bytes: Vec<u8>) -> Option<Vec<u8>> {
        let mut routes = self.routes.lock().await;
        let inbox = routes.get(&addr)?;
        match inbox.try_send(bytes) {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => {
                log::debug!("[server] inbox for {addr} full; dropping datagram");
                None
            }
            Err(TrySendError::Closed(bytes)) => {
                routes.remove(&addr);
                Some(bytes)
            }
        }
    }

    async fn handle(&self, request: Request, addr: SocketAddr) {
        log::info!("[server] {request:?} from {addr}");
        match request {
            Request::List => {
                let reply = match list_files(&self.config.storage_dir).await {
                    Ok(names) if names.is_empty() => EMPTY_LISTING.to_owned(),
                    Ok(names) => names.join("\n"),
                    Err(e) => {
                        log::warn!("[server] listing failed: {e}");
                        "Error while listing files.".to_owned()
                    }
                };
                self.reply(addr, reply.as_bytes()).await;
            }
            Request::Upload(None) => log::warn!("[server] UPLOAD without a file name from {addr}"),
            Request::Upload(Some(name)) => self.start_upload(addr, name).await,
            Request::Download(None) => {
                let error = Packet::error("file name not specified");
                self.reply(addr, &error.encode()).await;
            }
            Request::Download(Some(name)) => self.start_download(addr, name).await,
        }
    }

    async fn start_upload(&self, addr: SocketAddr, name: String) {
        let path = self.config.storage_dir.join(&name);
        let idle_timeout = self.config.transfer.idle_timeout;
        let (mut channel, inbox) = self.open_route(addr).await;

        tokio::spawn(run_to_completion(self.routes.clone(), addr, inbox, async move {
            let mut sink = FileSink::new(&path);
            match receiver::receive(&mut channel, &mut sink, idle_timeout).await {
                Ok(report) => log::info!(
                    "[server] saved '{name}' from {addr} ({} bytes)",
                    report.bytes
                ),
                Err(e) => log::warn!("[server] upload of '{name}' from {addr} failed: {e}"),
            }
        }));
    }

    async fn start_download(&self, addr: SocketAddr, name: String) {
        let path = self.config.storage_dir.join(&name);
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                log::warn!("[server] DOWNLOAD '{name}' from {addr}: {e}");
                let error = Packet::error(&format!("file '{name}' not found on the server"));
                self.reply(addr, &error.encode()).await;
                return;
            }
        };
        let config = self.config.transfer.clone();
        let (mut channel, inbox) = self.open_route(addr).await;

        tokio::spawn(run_to_completion(self.routes.clone(), addr, inbox, async move {
            match sender::send(&mut channel, &mut file, &config).await {
                Ok(report) => log::info!(
                    "[server] sent '{name}' to {addr} ({} bytes)",
                    report.bytes
                ),
                Err(e) => log::warn!("[server] download of '{name}' by {addr} failed: {e}"),
            }
        }));
    }

    /// Register a fresh inbox for `addr`.  Returns the transfer's channel and
    /// a handle identifying the route for later removal.
    async fn open_route(&self, addr: SocketAddr) -> (RoutedChannel, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.routes.lock().await.insert(addr, tx.clone());
        (RoutedChannel::new(self.socket.clone(), addr, rx), tx)
    }

    async fn reply(&self, addr: SocketAddr, bytes: &[u8]) {
        if let Err(e) = self.socket.send_to(bytes, addr).await {
            log::warn!("[server] reply to {addr} failed: {e}");
        }
    }
}

/// Run one transfer, then drop its route unless a newer transfer with the
/// same peer has replaced it.
async fn run_to_completion<F>(routes: Routes, addr: SocketAddr, inbox: mpsc::Sender<Vec<u8>>, transfer: F)
where
    F: std::future::Future<Output = ()>,
{
    transfer.await;
    let mut routes = routes.lock().await;
    if routes.get(&addr).is_some_and(|tx| tx.same_channel(&inbox)) {
        routes.remove(&addr);
    }
}

/// Sorted names of the regular files in `dir`.
async fn list_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Requester side: one ephemeral socket talking to one server.
pub struct Client {
    channel: PeerChannel,
    config: TransferConfig,
}

impl Client {
    /// Bind an ephemeral socket for talking to `server`.
    pub async fn connect(server: SocketAddr, config: TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = Arc::new(Socket::bind(local).await?);
        Ok(Self {
            channel: PeerChannel::new(socket, server),
            config,
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.channel.peer()
    }

    /// Names of the files stored on the server.
    pub async fn list(&mut self) -> Result<Vec<String>, TransferError> {
        self.channel.send(&Request::List.encode()).await?;
        let deadline = Instant::now() + LIST_TIMEOUT;
        loop {
            let Some(bytes) = self.channel.recv_until(deadline).await? else {
                return Err(TransferError::PeerTimeout(LIST_TIMEOUT));
            };
            // Leftovers from an earlier transfer start with a packet type byte.
            if bytes
                .first()
                .is_some_and(|&b| !matches!(PacketType::from(b), PacketType::Unknown(_)))
            {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);
            if text == EMPTY_LISTING {
                return Ok(Vec::new());
            }
            return Ok(text.lines().map(str::to_owned).collect());
        }
    }

    /// Send the local file at `path`, stored on the server under its file name.
    pub async fn upload(&mut self, path: &Path) -> Result<SendReport, TransferError> {
        let name = path
            .to_str()
            .and_then(file_name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let mut file = fs::File::open(path).await?;

        log::info!("[client] uploading '{name}' to {}", self.server());
        self.channel.send(&Request::Upload(Some(name)).encode()).await?;
        sender::send(&mut self.channel, &mut file, &self.config).await
    }

    /// Fetch `name` from the server into `dest_dir`.
    ///
    /// Returns the path written and the transfer counters.
    pub async fn download(
        &mut self,
        name: &str,
        dest_dir: &Path,
    ) -> Result<(PathBuf, ReceiveReport), TransferError> {
        let name = file_name(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty file name"))?;
        let mut sink = FileSink::new(dest_dir.join(&name));

        log::info!("[client] downloading '{name}' from {}", self.server());
        self.channel.send(&Request::Download(Some(name)).encode()).await?;
        let report = receiver::receive(&mut self.channel, &mut sink, self.config.idle_timeout).await?;
        Ok((sink.path().to_path_buf(), report))
    }
}
