//! Zeitgeist activity log
//!
//! Pause and resume feed the desktop's activity journal so "recently
//! used" surfaces stay honest. Strictly fire-and-forget: the event is
//! spawned off and a missing or broken journal is a debug line, never an
//! error the lifecycle path sees.

use zbus::Connection;

use crate::appid::AppId;

const ZG_SERVICE: &str = "org.gnome.zeitgeist.Engine";
const ZG_PATH: &str = "/org/gnome/zeitgeist/log/activity";
const ZG_INTERFACE: &str = "org.gnome.zeitgeist.Log";

const ZG_ONTOLOGY: &str = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#";

#[derive(Debug, Clone, Copy)]
pub(crate) enum ActivityEvent {
    /// The user came (back) to the app.
    Access,
    /// The user left the app.
    Leave,
}

impl ActivityEvent {
    fn interpretation(self) -> String {
        match self {
            Self::Access => format!("{}AccessEvent", ZG_ONTOLOGY),
            Self::Leave => format!("{}LeaveEvent", ZG_ONTOLOGY),
        }
    }
}

/// One event in Zeitgeist's `a(asaasay)` wire shape: event fields,
/// subjects, payload.
type WireEvent = (Vec<String>, Vec<Vec<String>>, Vec<u8>);

fn wire_event(appid: &str, event: ActivityEvent) -> WireEvent {
    let actor = format!("application://{}.desktop", appid);
    (
        vec![
            String::new(), // event id, assigned by the engine
            String::new(), // timestamp, filled in by the engine
            event.interpretation(),
            format!("{}UserActivity", ZG_ONTOLOGY),
            actor.clone(),
        ],
        vec![vec![
            actor,
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ]],
        Vec::new(),
    )
}

/// Record an access/leave event. Spawned onto the current loop; failures
/// never reach the caller.
pub(crate) fn report(conn: &Connection, appid: &AppId, event: ActivityEvent) {
    let conn = conn.clone();
    let appid = appid.to_string();
    tokio::spawn(async move {
        let events = vec![wire_event(&appid, event)];
        let result = conn
            .call_method(
                Some(ZG_SERVICE),
                ZG_PATH,
                Some(ZG_INTERFACE),
                "InsertEvents",
                &(events,),
            )
            .await;
        if let Err(e) = result {
            log::debug!("activity event for {} not recorded: {}", appid, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_event_shape() {
        let (fields, subjects, payload) = wire_event("pkg_app_1.0", ActivityEvent::Leave);
        assert_eq!(fields.len(), 5);
        assert!(fields[2].ends_with("#LeaveEvent"));
        assert_eq!(fields[4], "application://pkg_app_1.0.desktop");
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].len(), 7);
        assert_eq!(subjects[0][0], "application://pkg_app_1.0.desktop");
        assert!(payload.is_empty());
    }

    #[test]
    fn test_interpretations_differ() {
        assert_ne!(
            ActivityEvent::Access.interpretation(),
            ActivityEvent::Leave.interpretation()
        );
    }
}
