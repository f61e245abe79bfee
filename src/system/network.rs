/// Command printing the IPv4 address of `interface`, one per line.
pub fn ipv4_query(interface: &str) -> String {
    format!("ip addr list {interface} | grep 'inet ' | cut -d' ' -f6 | cut -d/ -f1")
}

/// Pick the address out of [`ipv4_query`] output.
///
/// Takes the last line that looks like a dotted quad; `None` if the interface
/// has no IPv4 address.
pub fn parse_ipv4(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| l.parse::<std::net::Ipv4Addr>().is_ok())
        .map(str::to_string)
}
