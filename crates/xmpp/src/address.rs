//! Address parsing and identifier validation on top of the `jid` crate.

use jid::{BareJid, FullJid, Jid};

use crate::error::ValidationError;

pub fn parse_address(address: &str) -> Result<Jid, ValidationError> {
    Jid::new(address).map_err(|_| ValidationError::Address(address.to_string()))
}

/// Normalized bare form of `address` (`user@domain`), or a validation error.
pub fn bare_address(address: &str) -> Result<BareJid, ValidationError> {
    Ok(parse_address(address)?.to_bare())
}

/// Whether `from` names the account itself (bare comparison after
/// normalization).
pub fn is_own_address(from: &str, own: &BareJid) -> bool {
    Jid::new(from).is_ok_and(|jid| jid.to_bare() == *own)
}

/// Resource part of `address`, if any.
pub fn resource_of(address: &str) -> Option<String> {
    Jid::new(address)
        .ok()?
        .resource()
        .map(|resource| resource.to_string())
}

/// Validate the three parts of a room address, naming the first part that
/// fails. Returns the bare room address and the full occupant address.
pub fn validate_room_address(
    room: &str,
    server: &str,
    handle: &str,
) -> Result<(BareJid, FullJid), ValidationError> {
    if server.is_empty() || server.contains(['@', '/']) || BareJid::new(server).is_err() {
        return Err(ValidationError::Server(server.to_string()));
    }

    if room.is_empty() || room.contains(['@', '/']) {
        return Err(ValidationError::Room(room.to_string()));
    }
    let bare = BareJid::new(&format!("{room}@{server}"))
        .map_err(|_| ValidationError::Room(room.to_string()))?;

    validate_handle(&bare, handle).map(|full| (bare, full))
}

/// Validate a room handle against an already valid room address.
pub fn validate_handle(room: &BareJid, handle: &str) -> Result<FullJid, ValidationError> {
    if handle.is_empty() {
        return Err(ValidationError::Handle(handle.to_string()));
    }
    FullJid::new(&format!("{room}/{handle}"))
        .map_err(|_| ValidationError::Handle(handle.to_string()))
}
