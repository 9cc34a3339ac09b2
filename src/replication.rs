//! Server-wide replication bookkeeping: role, replication id, and offset.
//!
//! The attached-replica *set* itself lives inside [`crate::store::Store`]
//! (see that module's doc comment for why); this module only carries the
//! small pieces of state that every connection needs to read in order to
//! answer `INFO` and to know whether it should behave as a master or a
//! replica.

use std::sync::atomic::{AtomicI64, Ordering};

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

pub struct ReplicationInfo {
    pub role: Role,
    pub master_replid: String,
    master_repl_offset: AtomicI64,
}

impl ReplicationInfo {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            master_replid: generate_replid(),
            master_repl_offset: AtomicI64::new(0),
        }
    }

    pub fn master_repl_offset(&self) -> i64 {
        self.master_repl_offset.load(Ordering::Acquire)
    }

    /// Advances the offset by the byte length of a just-propagated write
    /// frame. Byte-accurate tracking isn't strictly required, but it's
    /// free bookkeeping here and gives `WAIT`-style future extensions
    /// something real to read.
    pub fn advance_offset(&self, by: usize) {
        self.master_repl_offset.fetch_add(by as i64, Ordering::AcqRel);
    }

    /// Renders the body of the `INFO` reply: `role`, `master_replid`,
    /// `master_repl_offset`, in that order.
    pub fn info_body(&self) -> String {
        format!(
            "role:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
            self.role.as_str(),
            self.master_replid,
            self.master_repl_offset()
        )
    }
}

/// A random 40-character alphanumeric replication id, generated once at
/// master startup. A hardcoded constant id would collide across restarts;
/// a real master generates a fresh one every time it starts.
pub fn generate_replid() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replid_is_40_char_alphanumeric() {
        let id = generate_replid();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn info_body_field_order() {
        let info = ReplicationInfo::new(Role::Master);
        let body = info.info_body();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("role:master"));
        assert!(lines[1].starts_with("master_replid:"));
        assert_eq!(lines[2], "master_repl_offset:0");
    }

    #[test]
    fn advance_offset_accumulates() {
        let info = ReplicationInfo::new(Role::Master);
        info.advance_offset(37);
        info.advance_offset(5);
        assert_eq!(info.master_repl_offset(), 42);
    }
}
