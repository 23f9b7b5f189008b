//! Resource string classification
//!
//! Decides which adapter serves a resource string. Strings follow VISA
//! conventions, with bare OS serial device names accepted as a shorthand.

use std::fmt;

use crate::error::{AppResult, ToolsError};

/// Where a resource string points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// Serial port, e.g. "ASRL/dev/ttyUSB0::INSTR" or "COM3"
    Serial {
        /// OS device name
        port: String,
        /// VISA form, kept for display
        resource: String,
    },
    /// Raw socket, e.g. "TCPSOCKET::169.254.8.194::4000::SOCKET"
    Socket { host: String, port: u16 },
    /// Anything else is handed to the VISA library unchanged
    Visa { resource: String },
}

impl ResourceAddress {
    pub fn parse(resource: &str) -> AppResult<Self> {
        let trimmed = resource.trim();
        if trimmed.is_empty() {
            return Err(ToolsError::OutOfRange("empty resource string".to_string()));
        }
        let upper = trimmed.to_ascii_uppercase();

        if upper.starts_with("TCPSOCKET") {
            let parts: Vec<&str> = trimmed.split("::").collect();
            return match parts.as_slice() {
                [_, host, port, rest @ ..] if rest.iter().all(|r| r.eq_ignore_ascii_case("SOCKET")) => {
                    let port = port.parse::<u16>().map_err(|_| {
                        ToolsError::OutOfRange(format!("invalid socket port in '{}'", trimmed))
                    })?;
                    Ok(Self::Socket {
                        host: host.to_string(),
                        port,
                    })
                }
                _ => Err(ToolsError::OutOfRange(format!(
                    "malformed socket resource '{}'",
                    trimmed
                ))),
            };
        }

        if upper.starts_with("ASRL") {
            let body = &trimmed[4..];
            let body = body
                .strip_suffix("::INSTR")
                .or_else(|| body.strip_suffix("::instr"))
                .unwrap_or(body);
            if body.is_empty() {
                return Err(ToolsError::OutOfRange(format!(
                    "serial resource '{}' names no port",
                    trimmed
                )));
            }
            // VISA numbers serial ports from 1 ("ASRL3::INSTR" is COM3).
            let port = if body.chars().all(|c| c.is_ascii_digit()) {
                let number = match body.parse::<u32>() {
                    Ok(n) if n > 0 => n,
                    _ => {
                        return Err(ToolsError::OutOfRange(format!(
                            "serial resource '{}': ports are numbered from 1",
                            trimmed
                        )))
                    }
                };
                if cfg!(windows) {
                    format!("COM{}", number)
                } else {
                    format!("/dev/ttyS{}", number - 1)
                }
            } else {
                body.to_string()
            };
            return Ok(Self::Serial {
                port,
                resource: format!("ASRL{}::INSTR", body),
            });
        }

        if trimmed.starts_with("/dev/") || is_com_port(&upper) {
            return Ok(Self::Serial {
                port: trimmed.to_string(),
                resource: format!("ASRL{}::INSTR", trimmed),
            });
        }

        Ok(Self::Visa {
            resource: trimmed.to_string(),
        })
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { resource, .. } => f.write_str(resource),
            Self::Socket { host, port } => write!(f, "TCPSOCKET::{}::{}::SOCKET", host, port),
            Self::Visa { resource } => f.write_str(resource),
        }
    }
}

fn is_com_port(upper: &str) -> bool {
    upper
        .strip_prefix("COM")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// VISA-style name for an OS serial port
pub fn serial_resource_name(port: &str) -> String {
    format!("ASRL{}::INSTR", port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pyvisa_py_serial_names() {
        assert_eq!(
            ResourceAddress::parse("ASRL/dev/ttyUSB0::INSTR").unwrap(),
            ResourceAddress::Serial {
                port: "/dev/ttyUSB0".into(),
                resource: "ASRL/dev/ttyUSB0::INSTR".into(),
            }
        );
    }

    #[test]
    fn test_numbered_serial_ports() {
        let asrl3 = ResourceAddress::parse("ASRL3::INSTR").unwrap();
        let expected = if cfg!(windows) { "COM3" } else { "/dev/ttyS2" };
        assert!(matches!(&asrl3, ResourceAddress::Serial { port, .. } if port == expected));
        assert_eq!(asrl3.to_string(), "ASRL3::INSTR");

        let asrl1 = ResourceAddress::parse("ASRL1::INSTR").unwrap();
        let expected = if cfg!(windows) { "COM1" } else { "/dev/ttyS0" };
        assert!(matches!(&asrl1, ResourceAddress::Serial { port, .. } if port == expected));

        assert!(ResourceAddress::parse("ASRL0::INSTR").is_err());
        assert!(ResourceAddress::parse("ASRL::INSTR").is_err());
    }

    #[test]
    fn test_bare_device_paths_are_serial() {
        assert!(ResourceAddress::parse("/dev/ttyACM1").unwrap().is_serial());
        assert!(ResourceAddress::parse("COM7").unwrap().is_serial());
        assert!(!ResourceAddress::parse("COMPANY::1::INSTR").unwrap().is_serial());
    }

    #[test]
    fn test_socket_resource() {
        assert_eq!(
            ResourceAddress::parse("TCPSOCKET::169.254.8.194::4000::SOCKET").unwrap(),
            ResourceAddress::Socket {
                host: "169.254.8.194".into(),
                port: 4000
            }
        );
        assert!(ResourceAddress::parse("TCPSOCKET::host::notaport::SOCKET").is_err());
        assert!(ResourceAddress::parse("TCPSOCKET::host").is_err());
    }

    #[test]
    fn test_visa_passthrough() {
        let usb = "USB0::0x1313::0x8078::P0012345::INSTR";
        assert_eq!(
            ResourceAddress::parse(usb).unwrap(),
            ResourceAddress::Visa {
                resource: usb.into()
            }
        );
        assert!(matches!(
            ResourceAddress::parse("TCPIP0::192.168.1.5::inst0::INSTR").unwrap(),
            ResourceAddress::Visa { .. }
        ));
    }

    #[test]
    fn test_display_round_trips_serial_names() {
        assert_eq!(serial_resource_name("/dev/ttyUSB0"), "ASRL/dev/ttyUSB0::INSTR");
        let parsed = ResourceAddress::parse(&serial_resource_name("/dev/ttyUSB0")).unwrap();
        assert_eq!(parsed.to_string(), "ASRL/dev/ttyUSB0::INSTR");
    }

    #[test]
    fn test_empty_resource_rejected() {
        assert!(ResourceAddress::parse("   ").is_err());
    }
}
