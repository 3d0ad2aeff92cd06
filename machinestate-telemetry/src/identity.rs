//! Machine identity derivation.
//!
//! Derives a short opaque id for the host from the first usable network
//! hardware address. Computed once on first access and cached for the
//! process lifetime; never fails (falls through to an empty string).

use std::sync::OnceLock;

use sysinfo::Networks;
use tracing::debug;

static MACHINE_ID: OnceLock<String> = OnceLock::new();

/// Get the machine id for this host.
///
/// The id is derived from the first non-zero MAC address found among the
/// network interfaces (scanned in sorted interface-name order, so the result
/// is stable on a given machine): all non-digit characters are stripped from
/// the address, the remaining digit string is parsed base-10 and re-encoded
/// base-36. Returns an empty string when no qualifying address exists.
pub fn machine_id() -> &'static str {
    MACHINE_ID.get_or_init(compute_machine_id).as_str()
}

fn compute_machine_id() -> String {
    match first_mac_address() {
        Some(mac) => {
            let id = id_from_mac(&mac);
            debug!(mac = %mac, id = %id, "Derived machine id");
            id
        }
        None => {
            debug!("No usable MAC address found; machine id is empty");
            String::new()
        }
    }
}

/// Find the first non-zero MAC address among the host's interfaces.
fn first_mac_address() -> Option<String> {
    let networks = Networks::new_with_refreshed_list();

    let mut interfaces: Vec<_> = networks.list().iter().collect();
    interfaces.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (_, data) in interfaces {
        let mac = data.mac_address();
        if !mac.is_unspecified() {
            return Some(mac.to_string());
        }
    }

    None
}

/// Convert a MAC address string into the identity token.
///
/// A MAC whose textual form contains no decimal digits yields an empty id,
/// the same as the no-interface case.
fn id_from_mac(mac: &str) -> String {
    let digits: String = mac.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }

    match digits.parse::<u128>() {
        Ok(value) => to_base36(value),
        Err(_) => String::new(),
    }
}

/// Encode a number in lowercase base-36.
fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();

    // DIGITS is ASCII, so the bytes always form a valid string.
    String::from_utf8(out).unwrap_or_default()
}
