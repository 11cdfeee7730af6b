use anyhow::Result;
use std::path::Path;

pub fn check_endpoint(endpoint: &str) -> Result<()> {
    let ep = endpoint.strip_prefix("tls://");
    anyhow::ensure!(ep.is_some(), "uplink.endpoint must start with tls://");
    let ep = ep.unwrap();
    let port = ep.split_once(':').map(|(_, p)| p);
    anyhow::ensure!(
        port.is_some_and(|p| p.parse::<u16>().is_ok()),
        "uplink.endpoint must be tls://host:port"
    );
    Ok(())
}

pub fn check_spool(spool_dir: &str, max_mb: u64) -> Result<()> {
    let p = Path::new(spool_dir);
    if p.exists() {
        anyhow::ensure!(p.is_dir(), "uplink.spool_dir is not a dir: {}", spool_dir);
    }
    anyhow::ensure!(max_mb >= 8, "uplink.spool_max_mb too small; set >= 8MB");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_and_port_required() {
        assert!(check_endpoint("tls://collector.example.net:9443").is_ok());
        assert!(check_endpoint("tcp://collector.example.net:9443").is_err());
        assert!(check_endpoint("tls://collector.example.net").is_err());
        assert!(check_endpoint("tls://collector.example.net:http").is_err());
    }

    #[test]
    fn spool_budget_floor() {
        assert!(check_spool("/tmp/airlink-spool", 8).is_ok());
        assert!(check_spool("/tmp/airlink-spool", 1).is_err());
    }
}
