//! Possible causes for dashboard status words

/// Look up a hint for a status word returned by the dashboard
pub const fn known_cause(sw: u16) -> Option<&'static str> {
    Some(match sw {
        0x6982 => "Have you uninstalled the existing CA with resetCustomCA first?",
        0x6985 => "Condition of use not satisfied (denied by the user?)",
        0x6A84 | 0x6A85 => "Not enough space?",
        0x6A83 => "Maybe this app requires a library to be installed first?",
        0x6484 => "Are you using the correct targetId?",
        0x6D00 | 0x6E00 => {
            "Unexpected state of device: verify that the right application is opened?"
        }
        0x6E01 => "CLA not supported - wrong APDU format after SCP?",
        0x5515 => "Did you unlock the device?",
        0x6814 => "Unexpected target device: verify that you are using the right device?",
        0x511F => "OS version incompatible with SDK used to build the app",
        0x5120 => "Sideload is not supported on Nano X",
        0x6511 => "Device is not in Recovery Mode - boot while holding button",
        0x6512 => "Device locked or not in right state",
        0x5707 => "SCP certificate validation failed - check custom CA installation",
        0x6603 => "SCP mutual authentication failed - certificate chain rejected",
        0x5214 => "Custom CA setup rejected - device may not be in onboarding state",
        0x6615 => "SCP encryption error - key mismatch or corrupted data",
        _ => return None,
    })
}

/// Cause string for a status word, falling back to the raw code
pub fn possible_cause(sw: u16) -> String {
    known_cause(sw).map_or_else(|| format!("Unknown reason (0x{sw:x})"), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown() {
        assert_eq!(possible_cause(0x6A85), "Not enough space?");
        assert_eq!(possible_cause(0x6A84), possible_cause(0x6A85));
        assert_eq!(possible_cause(0x1234), "Unknown reason (0x1234)");
        assert!(known_cause(0x9000).is_none());
    }
}
