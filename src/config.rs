//! Launch surface: `--port` and `--replicaof`.

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(name = "rudis", about = "A minimal RESP key-value server")]
pub struct Config {
    /// Listening TCP port.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Master host and port to replicate from. When present, this process
    /// runs as a replica and performs the handshake before accepting
    /// clients.
    #[arg(long, num_args = 2, value_names = ["HOST", "PORT"])]
    pub replicaof: Option<Vec<String>>,
}

impl Config {
    pub fn replica_of(&self) -> Option<(String, u16)> {
        let pair = self.replicaof.as_ref()?;
        let [host, port] = pair.as_slice() else {
            return None;
        };
        let port: u16 = port.parse().ok()?;
        Some((host.clone(), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_master_on_default_port() {
        let config = Config::parse_from(["rudis"]);
        assert_eq!(config.port, 6379);
        assert_eq!(config.replica_of(), None);
    }

    #[test]
    fn parses_replicaof_as_host_and_port() {
        let config = Config::parse_from(["rudis", "--port", "6380", "--replicaof", "localhost", "6379"]);
        assert_eq!(config.port, 6380);
        assert_eq!(config.replica_of(), Some(("localhost".to_string(), 6379)));
    }
}
