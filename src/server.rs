//! SSH server and per-connection session handling
//!
//! NIST 800-53: IA-2 (Identification and Authentication), AC-7 (Unsuccessful Logon Attempts),
//! AC-10 (Concurrent Session Control), AC-12 (Session Termination)
//! STIG: V-222601
//! Implementation: Accepts SSH connections, authenticates against the
//! user store (password or public key, generic failure for every cause),
//! enforces per-user session caps at registration, serves only the
//! `sftp` subsystem and wires it to the filesystem backend. A forced
//! close from the registry disconnects the SSH session, which fails any
//! blocked I/O and releases the transfer handles.

use crate::auth_limit::{AuthLimiter, AuthLimiterConfig};
use crate::backend::SftpBackend;
use crate::config::Config;
use crate::hooks::HookDispatcher;
use crate::quota::QuotaAccountant;
use crate::registry::ConnectionRegistry;
use crate::store::UserStore;
use crate::user::{User, UserStatus};
use crate::{Error, Result};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Server as SshServer, Session};
use russh::{Channel, ChannelId, Disconnect, MethodSet};
use russh_keys::key::{KeyPair, PublicKey};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// The SFTP server
pub struct Server {
    config: Arc<Config>,
    store: Arc<dyn UserStore>,
    registry: Arc<ConnectionRegistry>,
    accountant: Arc<QuotaAccountant>,
    hooks: Arc<HookDispatcher>,
    auth_limiter: Arc<AuthLimiter>,
    ssh_config: Arc<russh::server::Config>,
}

impl Server {
    /// Create a server over a user store
    pub async fn new(config: Config, store: Arc<dyn UserStore>) -> Result<Self> {
        config.validate()?;

        let key_pair = load_host_key(&config.host_key_path).await?;
        let ssh_config = russh::server::Config {
            inactivity_timeout: Some(Duration::from_secs(config.ssh_timeout_secs)),
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![key_pair],
            ..Default::default()
        };

        let auth_limiter = Arc::new(AuthLimiter::new(AuthLimiterConfig {
            max_failures: config.max_auth_failures,
            window: Duration::from_secs(config.auth_window_secs),
            lockout: Duration::from_secs(config.lockout_duration_secs),
        }));
        let accountant = Arc::new(QuotaAccountant::new(store.clone()));
        let hooks = HookDispatcher::new(config.actions.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            registry: Arc::new(ConnectionRegistry::new()),
            accountant,
            hooks,
            auth_limiter,
            ssh_config: Arc::new(ssh_config),
        })
    }

    /// The live connection registry, backing the admin surface
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// The quota accountant, backing quota-scan administration
    pub fn accountant(&self) -> Arc<QuotaAccountant> {
        self.accountant.clone()
    }

    /// The user store the server authenticates against
    pub fn store(&self) -> Arc<dyn UserStore> {
        self.store.clone()
    }

    /// Run the server until the listener fails
    pub async fn run(mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!(
            event = "server_listening",
            addr = %addr,
            idle_timeout_secs = self.config.idle_timeout_secs,
            "SFTP server listening"
        );

        if self.config.idle_timeout_secs > 0 {
            let registry = self.registry.clone();
            let limiter = self.auth_limiter.clone();
            let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(idle_timeout / 2);
                loop {
                    ticker.tick().await;
                    let swept = registry.sweep_idle(idle_timeout);
                    if swept > 0 {
                        info!(event = "idle_sweep", swept, "Idle sweep closed connections");
                    }
                    limiter.cleanup();
                }
            });
        }

        let ssh_config = self.ssh_config.clone();
        self.run_on_address(ssh_config, addr)
            .await
            .map_err(|e| Error::Connection(format!("server error: {}", e)))?;
        Ok(())
    }
}

impl SshServer for Server {
    type Handler = SessionHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> SessionHandler {
        debug!(event = "client_connected", peer = ?peer_addr, "Incoming connection");
        SessionHandler {
            store: self.store.clone(),
            registry: self.registry.clone(),
            accountant: self.accountant.clone(),
            hooks: self.hooks.clone(),
            auth_limiter: self.auth_limiter.clone(),
            peer_addr,
            user: None,
            connection_id: None,
            close_signal: None,
            watcher_spawned: false,
            channels: HashMap::new(),
        }
    }
}

enum Credential<'a> {
    Password(&'a str),
    PublicKey(&'a PublicKey),
}

/// Per-connection SSH handler
///
/// NIST 800-53: IA-2 (Identification and Authentication), AC-10 (Concurrent Session Control)
pub struct SessionHandler {
    store: Arc<dyn UserStore>,
    registry: Arc<ConnectionRegistry>,
    accountant: Arc<QuotaAccountant>,
    hooks: Arc<HookDispatcher>,
    auth_limiter: Arc<AuthLimiter>,
    peer_addr: Option<SocketAddr>,
    user: Option<User>,
    connection_id: Option<String>,
    close_signal: Option<Arc<Notify>>,
    watcher_spawned: bool,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl SessionHandler {
    fn reject_all() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
        }
    }

    fn reject_retry() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::PUBLICKEY | MethodSet::PASSWORD),
        }
    }

    /// Run the credential callback for either method
    ///
    /// Unknown user, disabled account, disabled method and wrong
    /// credential all collapse into one generic rejection.
    ///
    /// NIST 800-53: IA-2, AC-7, AC-10
    fn authenticate(&mut self, username: &str, credential: Credential<'_>) -> Auth {
        let ip = self.peer_addr.map(|a| a.ip());
        if let Some(ip) = ip {
            if !self.auth_limiter.check_allowed(ip) {
                return Self::reject_all();
            }
        }

        let user = match self.verify_user(username, credential) {
            Ok(user) => user,
            Err(e) => {
                if let Some(ip) = ip {
                    self.auth_limiter.record_failure(ip);
                }
                warn!(
                    event = "auth_failure",
                    username,
                    peer = ?self.peer_addr,
                    error = %e,
                    "Authentication failed"
                );
                return Self::reject_retry();
            }
        };

        // Session cap: checked and registered atomically, before the
        // subsystem ever opens
        match self.registry.register(&user, "", self.peer_addr) {
            Some((connection_id, close_signal)) => {
                if let Some(ip) = ip {
                    self.auth_limiter.record_success(ip);
                }
                if let Err(e) = self.store.record_login(user.id) {
                    debug!(error = %e, "Could not record login time");
                }
                info!(
                    event = "auth_success",
                    username,
                    connection_id = %connection_id,
                    peer = ?self.peer_addr,
                    "Authentication succeeded"
                );
                self.user = Some(user);
                self.connection_id = Some(connection_id);
                self.close_signal = Some(close_signal);
                Auth::Accept
            }
            None => Self::reject_all(),
        }
    }

    fn verify_user(&self, username: &str, credential: Credential<'_>) -> Result<User> {
        let user = self
            .store
            .get_by_username(username)
            .map_err(|_| Error::Authentication(format!("unknown user: {}", username)))?;
        if user.status == UserStatus::Disabled {
            return Err(Error::Authentication(format!(
                "account disabled: {}",
                username
            )));
        }

        match credential {
            Credential::Password(password) => {
                if !user.password_auth_enabled() {
                    return Err(Error::Authentication(format!(
                        "password auth disabled for {}",
                        username
                    )));
                }
                let hash = user.password_hash.as_deref().unwrap_or_default();
                if verify_password(hash, password) {
                    Ok(user)
                } else {
                    Err(Error::Authentication(format!(
                        "wrong password for {}",
                        username
                    )))
                }
            }
            Credential::PublicKey(offered) => {
                if !user.pubkey_auth_enabled() {
                    return Err(Error::Authentication(format!(
                        "public-key auth disabled for {}",
                        username
                    )));
                }
                let authorized = user.public_keys.iter().any(|line| {
                    parse_authorized_key(line)
                        .map(|key| key.fingerprint() == offered.fingerprint())
                        .unwrap_or(false)
                });
                if authorized {
                    Ok(user)
                } else {
                    Err(Error::Authentication(format!(
                        "offered key not authorized for {}",
                        username
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        Ok(self.authenticate(user, Credential::Password(password)))
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        Ok(self.authenticate(user, Credential::PublicKey(public_key)))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool> {
        // A forced close or idle eviction disconnects the transport; I/O
        // blocked on the channel fails and the session task exits.
        if !self.watcher_spawned {
            if let Some(close_signal) = self.close_signal.clone() {
                let handle = session.handle();
                tokio::spawn(async move {
                    close_signal.notified().await;
                    let _ = handle
                        .disconnect(
                            Disconnect::ByApplication,
                            "connection closed by administrator".to_string(),
                            "en".to_string(),
                        )
                        .await;
                });
                self.watcher_spawned = true;
            }
        }
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<()> {
        if name != "sftp" {
            warn!(event = "subsystem_refused", subsystem = name, "Unsupported subsystem");
            session.channel_failure(channel_id);
            return Ok(());
        }

        let (user, connection_id) = match (self.user.clone(), self.connection_id.clone()) {
            (Some(user), Some(connection_id)) => (user, connection_id),
            _ => {
                session.channel_failure(channel_id);
                return Err(Error::Authentication("subsystem before auth".into()));
            }
        };
        let Some(channel) = self.channels.remove(&channel_id) else {
            session.channel_failure(channel_id);
            return Ok(());
        };

        let backend = match SftpBackend::new(
            user,
            connection_id.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.accountant.clone(),
            self.hooks.clone(),
        ) {
            Ok(backend) => backend,
            Err(e) => {
                error!(
                    event = "sftp_backend_failed",
                    connection_id = %connection_id,
                    error = %e,
                    "Could not start SFTP backend"
                );
                session.channel_failure(channel_id);
                return Ok(());
            }
        };

        session.channel_success(channel_id);
        info!(
            event = "sftp_subsystem_opened",
            connection_id = %connection_id,
            "SFTP subsystem opened"
        );
        tokio::spawn(async move {
            russh_sftp::server::run(channel.into_stream(), backend).await;
        });
        Ok(())
    }

    /// Interactive shells are refused; this server speaks SFTP only
    async fn shell_request(&mut self, channel_id: ChannelId, session: &mut Session) -> Result<()> {
        warn!(event = "shell_refused", "Shell request refused");
        session.channel_failure(channel_id);
        Ok(())
    }

    /// Command execution is refused; this server speaks SFTP only
    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        warn!(event = "exec_refused", "Exec request refused");
        session.channel_failure(channel_id);
        Ok(())
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        if let Some(connection_id) = self.connection_id.take() {
            self.registry.unregister(&connection_id);
        }
    }
}

/// Verify a password against a stored argon2 PHC hash
///
/// The comparison runs inside the verifier and takes constant time with
/// respect to the stored credential.
///
/// NIST 800-53: IA-5 (Authenticator Management)
fn verify_password(stored_hash: &str, password: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Parse one OpenSSH `authorized_keys`-style line
fn parse_authorized_key(line: &str) -> Result<PublicKey> {
    let mut parts = line.split_whitespace();
    let _key_type = parts
        .next()
        .ok_or_else(|| Error::Config("empty public key line".into()))?;
    let key_base64 = parts
        .next()
        .ok_or_else(|| Error::Config("public key line has no key material".into()))?;
    russh_keys::parse_public_key_base64(key_base64)
        .map_err(|e| Error::Config(format!("invalid public key: {}", e)))
}

async fn load_host_key(path: &Path) -> Result<KeyPair> {
    if !path.exists() {
        warn!(
            event = "host_key_missing",
            path = ?path,
            "Host key not found, generating ephemeral ed25519 key"
        );
        return KeyPair::generate_ed25519()
            .ok_or_else(|| Error::Config("failed to generate host key".into()));
    }

    let key_data = tokio::fs::read_to_string(path).await?;
    russh_keys::decode_secret_key(&key_data, None)
        .map_err(|e| Error::Config(format!("failed to load host key: {}", e)))
}
