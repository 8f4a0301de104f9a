use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::NetError;
use crate::net::ConnectionInfo;
use crate::replication::{NetworkObject, ObjectCore, ObjectId, ObjectRegistry};
use crate::session::{
    ClientConfig, ClientSession, InfoServer, NewConnectionHandler, ServerConfig, ServerDirectory,
    ServerSession, SessionLinks,
};
use crate::sync::lock;

pub struct UpdateTicker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateTicker {
    pub const INTERVAL: Duration = Duration::from_millis(16);

    pub fn start(due: Arc<AtomicBool>, interval: Duration) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("lanplay-ticker".into())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    due.store(true, Ordering::SeqCst);
                }
            })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UpdateTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct Application {
    registry: Arc<Mutex<ObjectRegistry>>,
    directory: Arc<Mutex<ServerDirectory>>,
    links: SessionLinks,
    server: Option<ServerSession>,
    client: Option<ClientSession>,
    ticker: Option<UpdateTicker>,
    pending_handler: Option<NewConnectionHandler>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(ObjectRegistry::new())),
            directory: Arc::new(Mutex::new(ServerDirectory::new())),
            links: SessionLinks::default(),
            server: None,
            client: None,
            ticker: None,
            pending_handler: None,
        }
    }

    pub fn registry(&self) -> &Arc<Mutex<ObjectRegistry>> {
        &self.registry
    }

    pub fn objects(&self) -> MutexGuard<'_, ObjectRegistry> {
        lock(&self.registry)
    }

    pub fn register_factory<T, F>(&self, type_name: &str, factory: F)
    where
        T: NetworkObject,
        F: Fn(ObjectCore) -> Result<T, NetError> + Send + 'static,
    {
        lock(&self.registry).register_factory(type_name, factory);
    }

    pub fn start_server(&mut self, config: ServerConfig) -> Result<&ServerSession, NetError> {
        if self.server.is_some() {
            return Err(NetError::AlreadyRunning("server"));
        }
        let server = ServerSession::start(config, self.registry.clone(), self.links.clone())?;
        if let Some(handler) = self.pending_handler.take() {
            server.set_new_connection_handler(handler);
        }
        if self.ticker.is_none() {
            let due = self.links.replication_due.clone();
            self.ticker = Some(UpdateTicker::start(due, UpdateTicker::INTERVAL)?);
        }
        Ok(&*self.server.insert(server))
    }

    pub fn start_client(&mut self, config: ClientConfig) -> Result<&ClientSession, NetError> {
        if self.client.is_some() {
            return Err(NetError::AlreadyRunning("client"));
        }
        let client = ClientSession::start(
            config,
            self.registry.clone(),
            self.directory.clone(),
            self.links.clone(),
        )?;
        Ok(&*self.client.insert(client))
    }

    pub fn server(&self) -> Option<&ServerSession> {
        self.server.as_ref()
    }

    pub fn client(&self) -> Option<&ClientSession> {
        self.client.as_ref()
    }

    pub fn close_server(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        if let Some(mut server) = self.server.take() {
            server.close();
            lock(&self.registry).set_server_role(false);
        }
    }

    pub fn close_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.close();
        }
    }

    /// Tears everything down: broker relays first so no other process keeps
    /// forwarding to us, then the ticker and the sessions.
    pub fn shutdown_all(&mut self) {
        if let Some(server) = self.server.as_mut() {
            server.stop_broker();
        }
        if let Some(client) = self.client.as_mut() {
            client.stop_broker();
        }
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.close_server();
        self.close_client();
        lock(&self.directory).clear();
    }

    pub fn spawn_on_server<T, F>(&self, type_name: &str, build: F) -> Result<Option<ObjectId>, NetError>
    where
        T: NetworkObject,
        F: FnOnce(ObjectCore) -> Result<T, NetError>,
    {
        let mut registry = lock(&self.registry);
        Ok(registry
            .spawn_on_server(type_name, build)?
            .map(|object| object.core().id()))
    }

    pub fn despawn_on_server(&self, id: ObjectId) -> bool {
        let mut registry = lock(&self.registry);
        registry.is_server() && registry.despawn(id).is_some()
    }

    pub fn available_servers(&self, max_age: Option<Duration>) -> Vec<InfoServer> {
        lock(&self.directory).available(Instant::now(), max_age)
    }

    pub fn check_server_existence(&self, address: IpAddr) -> Result<(), NetError> {
        self.client
            .as_ref()
            .ok_or(NetError::NotConnected)?
            .check_server_existence(address)
    }

    pub fn not_responding(&self) -> Vec<ConnectionInfo> {
        let mut silent: Vec<ConnectionInfo> = self
            .client
            .as_ref()
            .filter(|client| client.is_server_silent())
            .and_then(ClientSession::server)
            .into_iter()
            .collect();
        if let Some(server) = &self.server {
            silent.extend(server.not_responding());
        }
        silent
    }

    pub fn set_new_connection_callback<F>(&mut self, handler: F)
    where
        F: FnMut(&ConnectionInfo, &mut ObjectRegistry) + Send + 'static,
    {
        match self.server.as_ref() {
            Some(server) => server.set_new_connection_handler(handler),
            None => self.pending_handler = Some(Box::new(handler)),
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_raises_flag_until_stopped() {
        let due = Arc::new(AtomicBool::new(false));
        let mut ticker = UpdateTicker::start(due.clone(), Duration::from_millis(1)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !due.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(due.load(Ordering::SeqCst));

        ticker.stop();
        assert!(!ticker.is_running());
        due.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert!(!due.load(Ordering::SeqCst));
    }

    #[test]
    fn test_no_server_means_no_spawn_or_despawn() {
        let app = Application::new();
        assert!(!app.despawn_on_server(ObjectId::new(1)));
        assert!(app.not_responding().is_empty());
        assert!(app.available_servers(None).is_empty());
        assert!(matches!(
            app.check_server_existence(IpAddr::from([127, 0, 0, 1])),
            Err(NetError::NotConnected)
        ));
    }

    #[test]
    fn test_callback_waits_for_server() {
        let mut app = Application::new();
        app.set_new_connection_callback(|_, _| {});
        assert!(app.pending_handler.is_some());
    }
}
