//! Shell handshake protocols
//!
//! Two protocols run against the session broadcast surface (interface
//! `com.canonical.UbuntuAppLaunch`, path `/`):
//!
//! - The *starting handshake* before a launch: announce the appid with
//!   `UnityStartingBroadcast`, then wait a bounded time for the shell's
//!   `UnityStartingSignal` ack so it can get a splash up first.
//! - The *second-exec protocol* when a launch hits an already-running
//!   unit: announce with `UnityResumeRequest`, hand the new URIs to the
//!   running process over `org.freedesktop.Application.Open`, give the
//!   shell up to 500 ms to unfreeze the app (`UnityResumeResponse`), then
//!   request focus with `UnityFocusRequest`.
//!
//! Every ack wait is bounded and a missing shell is the normal path, not
//! an error. Both protocols talk through the [`ShellBus`] seam so their
//! timing can be driven by a scripted fake.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use zbus::message::Type as MessageType;
use zbus::names::BusName;
use zbus::{Connection, MatchRule, MessageStream};

use crate::appid::AppId;
use crate::error::Result;

pub(crate) const SHELL_INTERFACE: &str = "com.canonical.UbuntuAppLaunch";
pub(crate) const SHELL_PATH: &str = "/";

/// How long an already-running app gets to acknowledge a resume.
const RESUME_WINDOW: Duration = Duration::from_millis(500);

/// Emit a signal on the session broadcast surface.
pub(crate) async fn emit_signal<B>(conn: &Connection, name: &str, body: &B) -> zbus::Result<()>
where
    B: serde::ser::Serialize + zbus::zvariant::DynamicType,
{
    conn.emit_signal(Option::<BusName<'_>>::None, SHELL_PATH, SHELL_INTERFACE, name, body)
        .await
}

fn ack_rule(member: &str, appid: &str) -> zbus::Result<MatchRule<'static>> {
    Ok(MatchRule::builder()
        .msg_type(MessageType::Signal)
        .interface(SHELL_INTERFACE)?
        .member(member)?
        .arg(0, appid)?
        .build()
        .to_owned())
}

/// Announce an imminent launch and give the shell a moment to prepare.
///
/// A zero `wait` still broadcasts but skips the ack subscription: the
/// caller has its own in-process observer and would only race itself.
/// Failures degrade to proceed-with-a-warning; the launch never blocks
/// on a shell that is not there.
pub(crate) async fn starting_handshake<S: ShellBus>(shell: &S, appid: &AppId, wait: Duration) {
    let appid = appid.to_string();

    // Subscribe before announcing so the ack cannot slip past.
    let mut acks = if wait.is_zero() {
        None
    } else {
        match shell.subscribe_starting_acks(&appid).await {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("cannot subscribe to starting acks for {}: {}", appid, e);
                None
            }
        }
    };

    if let Err(e) = shell.announce_starting(&appid).await {
        log::warn!("starting broadcast for {} failed: {}", appid, e);
        return;
    }

    let Some(acks) = acks.as_mut() else { return };
    match tokio::time::timeout(wait, acks.next()).await {
        Ok(Some(_)) => log::debug!("shell acknowledged start of {}", appid),
        Ok(None) => log::debug!("starting ack stream for {} closed", appid),
        Err(_) => log::debug!("no starting ack for {} within {:?}", appid, wait),
    }
}

/// Session-bus surface the shell protocols run over.
pub(crate) trait ShellBus {
    type Acks: futures::Stream<Item = ()> + Unpin + Send;

    /// Stream of `UnityStartingSignal` acks for one appid.
    async fn subscribe_starting_acks(&self, appid: &str) -> Result<Self::Acks>;
    async fn announce_starting(&self, appid: &str) -> Result<()>;
    /// Stream of `UnityResumeResponse` acks for one appid.
    async fn subscribe_resume_acks(&self, appid: &str) -> Result<Self::Acks>;
    async fn announce_resume(&self, appid: &str, instance_id: &str) -> Result<()>;
    /// Every unique name currently on the bus.
    async fn list_peers(&self) -> Result<Vec<String>>;
    async fn peer_pid(&self, peer: &str) -> Result<u32>;
    async fn open_peer(&self, peer: &str, path: &str, uris: &[String]) -> Result<()>;
    async fn send_focus(&self, appid: &str, instance_id: &str) -> Result<()>;
}

/// The real surface: one session `zbus::Connection`.
pub(crate) struct SessionShell {
    conn: Connection,
}

impl SessionShell {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl ShellBus for SessionShell {
    type Acks = BoxStream<'static, ()>;

    async fn subscribe_starting_acks(&self, appid: &str) -> Result<Self::Acks> {
        let rule = ack_rule("UnityStartingSignal", appid)?;
        let stream = MessageStream::for_match_rule(rule, &self.conn, Some(4)).await?;
        Ok(stream.map(|_| ()).boxed())
    }

    async fn announce_starting(&self, appid: &str) -> Result<()> {
        emit_signal(&self.conn, "UnityStartingBroadcast", &(appid,)).await?;
        Ok(())
    }

    async fn subscribe_resume_acks(&self, appid: &str) -> Result<Self::Acks> {
        let rule = ack_rule("UnityResumeResponse", appid)?;
        let stream = MessageStream::for_match_rule(rule, &self.conn, Some(4)).await?;
        Ok(stream.map(|_| ()).boxed())
    }

    async fn announce_resume(&self, appid: &str, instance_id: &str) -> Result<()> {
        emit_signal(&self.conn, "UnityResumeRequest", &(appid, instance_id)).await?;
        Ok(())
    }

    async fn list_peers(&self) -> Result<Vec<String>> {
        let bus = zbus::fdo::DBusProxy::new(&self.conn)
            .await
            .map_err(zbus::Error::from)?;
        let names = bus.list_names().await.map_err(zbus::Error::from)?;
        Ok(names.into_iter().map(|n| n.to_string()).collect())
    }

    async fn peer_pid(&self, peer: &str) -> Result<u32> {
        let bus = zbus::fdo::DBusProxy::new(&self.conn)
            .await
            .map_err(zbus::Error::from)?;
        let name = BusName::try_from(peer).map_err(zbus::Error::from)?;
        Ok(bus
            .get_connection_unix_process_id(name)
            .await
            .map_err(zbus::Error::from)?)
    }

    async fn open_peer(&self, peer: &str, path: &str, uris: &[String]) -> Result<()> {
        self.conn
            .call_method(
                Some(peer),
                path,
                Some("org.freedesktop.Application"),
                "Open",
                &(uris, HashMap::<String, zbus::zvariant::Value<'_>>::new()),
            )
            .await?;
        Ok(())
    }

    async fn send_focus(&self, appid: &str, instance_id: &str) -> Result<()> {
        emit_signal(&self.conn, "UnityFocusRequest", &(appid, instance_id)).await?;
        Ok(())
    }
}

/// Run the second-exec protocol against an already-running unit.
///
/// Acks that arrive while URI deliveries are still outstanding are
/// consumed and ignored; the app may have acked a stale state. Only a
/// fresh ack after the delivery phase drains ends the 500 ms window
/// early. The focus request always goes out last.
pub(crate) async fn second_exec<S: ShellBus>(
    shell: &S,
    appid: &AppId,
    instance_id: &str,
    primary_pid: u32,
    uris: &[String],
) {
    let appid_str = appid.to_string();
    let deadline = tokio::time::Instant::now() + RESUME_WINDOW;

    let mut acks = match shell.subscribe_resume_acks(&appid_str).await {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("cannot subscribe to resume acks for {}: {}", appid_str, e);
            None
        }
    };

    // A failed announcement counts as acknowledged at time zero: the app
    // was never asked, so there is nothing to wait for.
    let announced = match shell.announce_resume(&appid_str, instance_id).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("resume request for {} failed: {}", appid_str, e);
            false
        }
    };

    let deliver = deliver_uris(shell, appid, primary_pid, uris);
    tokio::pin!(deliver);
    let mut acks_open = acks.is_some();
    loop {
        match acks.as_mut() {
            Some(stream) if acks_open => {
                tokio::select! {
                    _ = &mut deliver => break,
                    item = stream.next() => {
                        if item.is_none() {
                            acks_open = false;
                        }
                        // Raced the delivery; not the ack we are after.
                    }
                }
            }
            _ => {
                deliver.as_mut().await;
                break;
            }
        }
    }

    if announced {
        let fresh_ack = async {
            match acks.as_mut() {
                Some(stream) => loop {
                    match stream.next().await {
                        Some(()) => break,
                        None => std::future::pending::<()>().await,
                    }
                },
                None => std::future::pending().await,
            }
        };
        match tokio::time::timeout_at(deadline, fresh_ack).await {
            Ok(()) => log::debug!("{} resumed before the window closed", appid_str),
            Err(_) => log::debug!("resume window for {} elapsed", appid_str),
        }
    }

    if let Err(e) = shell.send_focus(&appid_str, instance_id).await {
        log::warn!("focus request for {} failed: {}", appid_str, e);
    }
}

/// Hand the new URIs to the running process: find the bus peer whose pid
/// matches the unit's primary pid and call `Open` on it.
async fn deliver_uris<S: ShellBus>(shell: &S, appid: &AppId, primary_pid: u32, uris: &[String]) {
    if uris.is_empty() {
        return;
    }
    if primary_pid == 0 {
        log::debug!("no primary pid for {}, uris not delivered", appid);
        return;
    }
    let peers = match shell.list_peers().await {
        Ok(p) => p,
        Err(e) => {
            log::warn!("cannot list bus peers for {}: {}", appid, e);
            return;
        }
    };
    let lookups = peers.into_iter().map(|peer| async move {
        let pid = shell.peer_pid(&peer).await;
        (peer, pid)
    });
    let target = futures::future::join_all(lookups)
        .await
        .into_iter()
        .find_map(|(peer, pid)| match pid {
            Ok(pid) if pid == primary_pid => Some(peer),
            _ => None,
        });
    let Some(peer) = target else {
        log::debug!("no bus peer has pid {} for {}", primary_pid, appid);
        return;
    };
    let path = appid.dbus_path();
    if let Err(e) = shell.open_peer(&peer, &path, uris).await {
        log::warn!("uri delivery to {} failed: {}", appid, e);
    }
}
