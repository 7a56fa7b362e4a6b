// SPDX-License-Identifier: MIT
//
// Network-facing identity of the device: MAC address, local IP, and the
// manufacturer serial tokens the cloud expects in register/hello messages.

use std::net::UdpSocket;

use tracing::debug;

/// Identifiers advertised during the cloud handshake.
///
/// The cloud-issued serial number is deliberately *not* held here; it lives
/// in the shared session state because it changes at runtime (set by a
/// successful registration, cleared by the delete command).
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub machine_type: String,
    pub printer_type: String,
    pub mac: String,
    pub local_ip: String,
}

impl DeviceIdentity {
    /// Probe the local network identifiers once at startup.
    pub fn detect(manufacturer: &str, machine_type: &str, printer_type: &str) -> Self {
        let mac = mac_string();
        let local_ip = local_ip_string();
        debug!(%mac, %local_ip, "device identity detected");
        Self {
            manufacturer: manufacturer.to_string(),
            machine_type: machine_type.to_string(),
            printer_type: printer_type.to_string(),
            mac,
            local_ip,
        }
    }

    /// The manufacturer serial token sent in the hello message:
    /// `{MFG}-{MAC without separators}`, manufacturer code upper-cased.
    pub fn mfg_serial(&self) -> String {
        format!(
            "{}-{}",
            self.manufacturer.to_uppercase(),
            self.mac.replace(':', "")
        )
    }

    /// Placeholder manufacturer serial used during registration, where the
    /// cloud has not yet issued anything device-specific.
    pub fn registration_mfg_serial(&self) -> &'static str {
        "1234567890"
    }
}

/// Primary interface MAC as uppercase colon-separated hex, or an all-zero
/// address if none can be read.
fn mac_string() -> String {
    match mac_address::get_mac_address() {
        Ok(Some(mac)) => {
            let b = mac.bytes();
            format!(
                "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            )
        }
        _ => "00:00:00:00:00:00".to_string(),
    }
}

/// Local IP as seen on the default route.
///
/// Connecting a UDP socket to a public address never sends a packet; it only
/// asks the kernel which source address it would pick.
fn local_ip_string() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity(mac: &str) -> DeviceIdentity {
        DeviceIdentity {
            manufacturer: "kl".into(),
            machine_type: "Cartesian".into(),
            printer_type: "Cartesian".into(),
            mac: mac.into(),
            local_ip: "192.168.1.50".into(),
        }
    }

    #[test]
    fn mfg_serial_strips_separators_and_uppercases() {
        let identity = test_identity("AA:BB:CC:11:22:33");
        assert_eq!(identity.mfg_serial(), "KL-AABBCC112233");
    }

    #[test]
    fn registration_serial_is_the_fixed_placeholder() {
        let identity = test_identity("AA:BB:CC:11:22:33");
        assert_eq!(identity.registration_mfg_serial(), "1234567890");
    }

    #[test]
    fn detect_always_produces_something() {
        let identity = DeviceIdentity::detect("kl", "Cartesian", "Cartesian");
        assert_eq!(identity.mac.split(':').count(), 6);
        assert!(!identity.local_ip.is_empty());
    }
}
