/// Stable key for a process time series.
///
/// Pids are recycled by the OS, so a series is keyed by pid, parent pid and
/// image name together. Two identities are equal only if all three match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
}

impl ProcessIdentity {
    pub fn new(pid: u32, ppid: u32, name: impl Into<String>) -> Self {
        ProcessIdentity {
            pid,
            ppid,
            name: name.into(),
        }
    }
}

/// One row of the OS process table. CPU times are in 100ns ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEntry {
    pub identity: ProcessIdentity,
    pub kernel_time: u64,
    pub user_time: u64,
}

impl ProcessEntry {
    pub fn pid(&self) -> u32 {
        self.identity.pid
    }

    pub fn ppid(&self) -> u32 {
        self.identity.ppid
    }
}

#[cfg(test)]
pub(crate) fn entry(pid: u32, ppid: u32, name: &str) -> ProcessEntry {
    ProcessEntry {
        identity: ProcessIdentity::new(pid, ppid, name),
        kernel_time: 0,
        user_time: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_uses_all_fields() {
        let a = ProcessIdentity::new(10, 1, "a.exe");
        assert_eq!(a, ProcessIdentity::new(10, 1, "a.exe"));
        assert_ne!(a, ProcessIdentity::new(10, 2, "a.exe"));
        assert_ne!(a, ProcessIdentity::new(10, 1, "b.exe"));
        assert_ne!(a, ProcessIdentity::new(11, 1, "a.exe"));
    }
}
