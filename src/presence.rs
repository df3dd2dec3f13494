//! Online-user set derived from the registry and pushed to every connection.

use std::collections::BTreeSet;

use log::debug;

use crate::messages::ServerEvent;
use crate::models::UserId;
use crate::registry::ConnectionHandle;

/// The presence view for a registry snapshot, in stable order.
pub fn online_users(snapshot: &BTreeSet<UserId>) -> Vec<UserId> {
    snapshot.iter().cloned().collect()
}

/// Sends the full online list to each target. A closed connection is skipped;
/// it never prevents delivery to the rest. Returns how many were reached.
pub fn broadcast<'a, I>(targets: I, online: &[UserId]) -> usize
where
    I: IntoIterator<Item = &'a ConnectionHandle>,
{
    let mut reached = 0;
    for target in targets {
        if target.send(ServerEvent::GetOnlineUsers(online.to_vec())) {
            reached += 1;
        } else {
            debug!("Presence update to {} dropped: connection closed", target.user);
        }
    }
    reached
}
