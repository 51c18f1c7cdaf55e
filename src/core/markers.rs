// MrcSleuth - core/markers.rs
//
// Boot progress markers. Scanned on every line, inside or outside blocks,
// independently of segmentation.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Last POST checkpoint printed by the BIOS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub socket: u8,
    pub major: String,
    pub minor: String,
    pub extra: String,
    pub line: u64,
}

/// What the console told us about the boot sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootProgress {
    pub last_checkpoint: Option<Checkpoint>,
    pub power_on_events: u32,
    pub power_off_events: u32,
    pub os_booted: bool,
}

struct BootPatterns {
    checkpoint: Regex,
    power_on: Regex,
    power_off: Regex,
    os_boot: Regex,
}

fn patterns() -> &'static BootPatterns {
    static PATTERNS: OnceLock<BootPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        fn re(pat: &str) -> Regex {
            Regex::new(pat).expect("boot marker: invalid regex")
        }
        BootPatterns {
            checkpoint: re(
                r"Checkpoint Code: Socket ([01]), (0x[0-9A-F]+), (0x[0-9A-F]+), (0x[0-9A-F]+)",
            ),
            power_on: re(r"Status Code Available"),
            power_off: re(r"SecSMI\. S5 Trap"),
            os_boot: re(r"OSBootEvent = Success"),
        }
    })
}

/// Accumulates boot progress from cleaned console lines.
#[derive(Debug, Default)]
pub struct BootTracker {
    progress: BootProgress,
}

impl BootTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, line: &str, line_no: u64) {
        let p = patterns();
        if let Some(c) = p.checkpoint.captures(line) {
            self.progress.last_checkpoint = Some(Checkpoint {
                socket: c[1].parse().unwrap_or_default(),
                major: c[2].to_string(),
                minor: c[3].to_string(),
                extra: c[4].to_string(),
                line: line_no,
            });
        } else if p.power_on.is_match(line) {
            self.progress.power_on_events += 1;
            tracing::info!(line = line_no, "Power on detected");
        } else if p.power_off.is_match(line) {
            self.progress.power_off_events += 1;
            tracing::info!(line = line_no, "Power off detected");
        } else if p.os_boot.is_match(line) {
            self.progress.os_booted = true;
            tracing::info!(line = line_no, "OS boot detected");
        }
    }

    pub fn progress(&self) -> &BootProgress {
        &self.progress
    }

    pub fn into_progress(self) -> BootProgress {
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_markers() {
        let mut t = BootTracker::new();
        t.observe("Checkpoint Code: Socket 0, 0xBF, 0x00, 0x0000", 1);
        t.observe("Checkpoint Code: Socket 1, 0xB2, 0x01, 0x0010", 2);
        t.observe("Status Code Available", 3);
        t.observe("SecSMI. S5 Trap", 4);
        t.observe("OSBootEvent = Success", 5);
        t.observe("unrelated", 6);

        let p = t.into_progress();
        let cp = p.last_checkpoint.unwrap();
        assert_eq!((cp.socket, cp.major.as_str(), cp.line), (1, "0xB2", 2));
        assert_eq!(p.power_on_events, 1);
        assert_eq!(p.power_off_events, 1);
        assert!(p.os_booted);
    }

    #[test]
    fn test_quiet_console_has_no_progress() {
        let t = BootTracker::new();
        assert_eq!(t.progress(), &BootProgress::default());
    }
}
