//! Host environment detection.
//!
//! A probe answers one question: what system name should the backend
//! registry look for? It is a trait so the heuristic can be swapped for a
//! fixed value in tests, and bypassed entirely with `--system`.

use std::process::{Command, Stdio};

pub trait SystemProbe {
    /// The detected system name, or `None` when nothing recognizable is
    /// running.
    fn probe(&self) -> Option<String>;
}

/// Black-box probing of the running host.
///
/// A Linux kernel is detected through `uname -s`; since that kernel may be
/// a Xen guest, a working `xl info` overrides the answer with `xen`.
pub struct HostProbe;

impl HostProbe {
    fn check_linux(&self) -> bool {
        Command::new("uname")
            .arg("-s")
            .output()
            .map(|output| output.stdout.starts_with(b"Linux\n"))
            .unwrap_or(false)
    }

    fn check_xen(&self) -> bool {
        if !nix::unistd::Uid::effective().is_root() {
            tracing::debug!("need root privileges to detect all systems correctly");
        }

        Command::new("xl")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl SystemProbe for HostProbe {
    fn probe(&self) -> Option<String> {
        let mut system = None;
        if self.check_linux() {
            system = Some("linux");
        }
        if self.check_xen() {
            system = Some("xen");
        }
        system.map(String::from)
    }
}
