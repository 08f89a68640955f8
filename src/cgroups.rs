//! Cgroup manager bridge
//!
//! PID snapshots come from a separate cgroup-manager service over D-Bus
//! (`GetTasksRecursive` on the freezer controller). The connection is
//! established lazily on first use and torn down again after ten seconds
//! of inactivity, so an idle launcher holds no socket open.
//!
//! Snapshots are racy by nature: the process set can change between the
//! call and the use of its result. Callers that need every pid loop until
//! a pass adds nothing new (see `instance::visit_converged`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use zbus::Connection;

use crate::error::Result;

pub const CG_MANAGER_ADDRESS_ENV: &str = "APP_LAUNCH_CG_MANAGER_ADDRESS";
pub const CG_MANAGER_SESSION_ENV: &str = "APP_LAUNCH_CG_MANAGER_SESSION_BUS";

const CG_MANAGER_ADDRESS: &str = "unix:path=/sys/fs/cgroup/cgmanager/sock";
const CG_MANAGER_NAME: &str = "org.linuxcontainers.cgmanager";
const CG_MANAGER_PATH: &str = "/org/linuxcontainers/cgmanager";
const CG_MANAGER_INTERFACE: &str = "org.linuxcontainers.cgmanager0_0";

const IDLE_TEARDOWN: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub(crate) struct CgroupBridge {
    state: Arc<Mutex<BridgeState>>,
}

struct BridgeState {
    conn: Option<Connection>,
    /// Bumped on every use; the idle reaper only closes the connection if
    /// nothing used it since the reaper was armed.
    generation: u64,
}

impl CgroupBridge {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BridgeState {
                conn: None,
                generation: 0,
            })),
        }
    }

    async fn connect() -> Result<Connection> {
        // Test harnesses put the manager on the session bus; production
        // talks to its private socket.
        if std::env::var_os(CG_MANAGER_SESSION_ENV).is_some() {
            return Ok(Connection::session().await?);
        }
        let address = std::env::var(CG_MANAGER_ADDRESS_ENV)
            .unwrap_or_else(|_| CG_MANAGER_ADDRESS.to_string());
        let conn = zbus::connection::Builder::address(address.as_str())?
            .p2p()
            .build()
            .await?;
        Ok(conn)
    }

    /// Snapshot of every task in `group` (and its children). An empty
    /// group name sweeps from the controller root.
    pub(crate) async fn tasks(&self, group: &str) -> Result<Vec<u32>> {
        let (conn, generation) = {
            let mut state = self.state.lock().await;
            let conn = match &state.conn {
                Some(conn) => conn.clone(),
                None => {
                    log::debug!("connecting to cgroup manager");
                    let conn = Self::connect().await?;
                    state.conn = Some(conn.clone());
                    conn
                }
            };
            state.generation += 1;
            (conn, state.generation)
        };

        let reply = conn
            .call_method(
                Some(CG_MANAGER_NAME),
                CG_MANAGER_PATH,
                Some(CG_MANAGER_INTERFACE),
                "GetTasksRecursive",
                &("freezer", group),
            )
            .await?;
        let pids: Vec<i32> = reply.body().deserialize()?;

        self.arm_reaper(generation);

        Ok(pids
            .into_iter()
            .filter(|pid| *pid > 0)
            .map(|pid| pid as u32)
            .collect())
    }

    fn arm_reaper(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(IDLE_TEARDOWN).await;
            let mut state = state.lock().await;
            if state.generation == generation && state.conn.is_some() {
                log::debug!("cgroup manager idle, dropping connection");
                state.conn = None;
            }
        });
    }
}
