use std::collections::HashMap;

use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::pool_registry::PoolRegistry;

#[derive(Debug, Deserialize)]
struct RawConfig {
    server_port: u16,
    #[serde(default = "default_state_file")]
    state_file: String,
    pools: HashMap<String, Vec<String>>,
}

fn default_state_file() -> String {
    "occupied-range.json".to_string()
}

#[derive(Debug)]
pub struct Config {
    pub server_port: u16,
    pub state_file: String,
    pub pools: HashMap<String, Vec<Ipv4Net>>,
}

impl Config {
    pub fn load(config_file: &str) -> Self {
        let contents = std::fs::read_to_string(config_file).unwrap_or_else(|e| {
            eprintln!("Failed to read configuration file '{}': {}", config_file, e);
            std::process::exit(1);
        });

        let raw: RawConfig = serde_yaml::from_str(&contents).unwrap_or_else(|e| {
            eprintln!("Failed to parse configuration file '{}': {}", config_file, e);
            std::process::exit(1);
        });

        let mut pools = HashMap::new();
        for (name, parents) in raw.pools {
            if parents.is_empty() {
                eprintln!("Range '{}' has no parent supernets configured", name);
                std::process::exit(1);
            }
            let mut nets = Vec::new();
            for parent in parents {
                let net: Ipv4Net = parent.parse().unwrap_or_else(|e| {
                    eprintln!("Bad parent supernet '{}' for range '{}': {}", parent, name, e);
                    std::process::exit(1);
                });
                if net.addr() != net.network() {
                    eprintln!(
                        "Parent supernet '{}' for range '{}' has host bits set",
                        parent, name
                    );
                    std::process::exit(1);
                }
                nets.push(net);
            }
            pools.insert(name, nets);
        }

        Self {
            server_port: raw.server_port,
            state_file: raw.state_file,
            pools,
        }
    }

    pub fn registry(&self) -> PoolRegistry {
        PoolRegistry::new(self.pools.clone())
    }
}
