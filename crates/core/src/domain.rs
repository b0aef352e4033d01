//! Domain-name helpers.
//!
//! Names are kept in their presentation form (`My\ Printer._ipp._tcp.local`),
//! without the trailing root dot. Comparison is ASCII case-insensitive, as
//! required for DNS.

use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::Error;

/// Maximum length of a single label, in bytes.
pub const LABEL_MAX: usize = 63;

/// Maximum length of a full domain name in presentation form, in bytes.
pub const DOMAIN_NAME_MAX: usize = 255;

/// Strips the trailing root dot (if any).
pub fn normalize(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed == "." {
        return String::new();
    }
    match trimmed.strip_suffix('.') {
        // "foo\." ends in an escaped dot, not the root label.
        Some(rest) if !ends_with_escape(rest) => rest.to_string(),
        _ => trimmed.to_string(),
    }
}

fn ends_with_escape(s: &str) -> bool {
    s.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

/// Canonical presentation form: no trailing dot, and only `.` and `\\`
/// escaped, so `Foo\ Bar` and `Foo\032Bar` both become `Foo Bar`.
pub fn canonical(name: &str) -> String {
    match split_labels(name) {
        Some(labels) => labels
            .iter()
            .map(|l| escape_label(l))
            .collect::<Vec<_>>()
            .join("."),
        None => normalize(name),
    }
}

/// Compares two names ignoring ASCII case, escaping and a trailing dot.
pub fn names_equal(a: &str, b: &str) -> bool {
    canonical(a).eq_ignore_ascii_case(&canonical(b))
}

/// Feeds the case-folded form of `name` into `state`.
pub(crate) fn hash_name<H: Hasher>(name: &str, state: &mut H) {
    for b in name.bytes() {
        b.to_ascii_lowercase().hash(state);
    }
    0xffu8.hash(state);
}

/// Splits a presentation-form name into unescaped labels.
///
/// Understands `\.`, `\\` and `\DDD` escapes. Returns `None` for a malformed
/// escape sequence.
pub fn split_labels(name: &str) -> Option<Vec<String>> {
    let name = normalize(name);
    if name.is_empty() {
        return Some(Vec::new());
    }

    let bytes = name.as_bytes();
    let mut labels = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let next = *bytes.get(i + 1)?;
                if next.is_ascii_digit() {
                    let digits = bytes.get(i + 1..i + 4)?;
                    if !digits.iter().all(u8::is_ascii_digit) {
                        return None;
                    }
                    let value = digits
                        .iter()
                        .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                    current.push(u8::try_from(value).ok()?);
                    i += 4;
                } else {
                    current.push(next);
                    i += 2;
                }
            }
            b'.' => {
                labels.push(String::from_utf8_lossy(&current).into_owned());
                current.clear();
                i += 1;
            }
            b => {
                current.push(b);
                i += 1;
            }
        }
    }
    labels.push(String::from_utf8_lossy(&current).into_owned());
    Some(labels)
}

/// Escapes a raw label for use in a presentation-form name.
pub fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '.' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Joins already-escaped name fragments with dots, skipping empty ones.
pub(crate) fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| normalize(p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Returns true if `name` is a syntactically valid, non-empty domain name.
pub fn is_valid_domain_name(name: &str) -> bool {
    let normalized = normalize(name);
    if normalized.is_empty() || normalized.len() > DOMAIN_NAME_MAX {
        return false;
    }
    match split_labels(&normalized) {
        Some(labels) => labels
            .iter()
            .all(|l| !l.is_empty() && l.len() <= LABEL_MAX),
        None => false,
    }
}

/// Returns true if `name` is usable as a host-name label (no dots).
pub fn is_valid_host_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= LABEL_MAX && !name.contains('.')
}

/// Returns true if `name` is usable as a DNS-SD service instance name.
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= LABEL_MAX
}

/// Returns true for a service type of the form `_app._tcp` / `_app._udp`.
pub fn is_valid_service_type(service_type: &str) -> bool {
    let Some(labels) = split_labels(service_type) else {
        return false;
    };
    let [app, proto] = labels.as_slice() else {
        return false;
    };
    app.len() > 1
        && app.len() <= LABEL_MAX
        && app.starts_with('_')
        && (proto.eq_ignore_ascii_case("_tcp") || proto.eq_ignore_ascii_case("_udp"))
}

/// Builds `<instance>.<type>.<domain>` with the instance label escaped.
pub fn service_name_join(name: &str, service_type: &str, domain: &str) -> Result<String, Error> {
    if !is_valid_service_name(name) {
        return Err(Error::InvalidServiceName(name.to_string()));
    }
    if !is_valid_service_type(service_type) {
        return Err(Error::InvalidServiceType(service_type.to_string()));
    }
    if !is_valid_domain_name(domain) {
        return Err(Error::InvalidDomainName(domain.to_string()));
    }
    let full = join(&[&escape_label(name), service_type, domain]);
    if full.len() > DOMAIN_NAME_MAX {
        return Err(Error::InvalidServiceName(full));
    }
    Ok(full)
}

/// Parts of a DNS-SD service instance name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNameParts {
    pub name: String,
    pub service_type: String,
    pub domain: String,
}

/// Splits `<instance>.<app>.<proto>.<domain>` into its parts.
///
/// The instance comes back unescaped; type and domain stay in presentation
/// form. Returns `None` if fewer than four labels are present.
pub fn service_name_split(full_name: &str) -> Option<ServiceNameParts> {
    let labels = split_labels(full_name)?;
    if labels.len() < 4 {
        return None;
    }
    let service_type = labels[1..3]
        .iter()
        .map(|l| escape_label(l))
        .collect::<Vec<_>>()
        .join(".");
    let domain = labels[3..]
        .iter()
        .map(|l| escape_label(l))
        .collect::<Vec<_>>()
        .join(".");
    Some(ServiceNameParts {
        name: labels[0].clone(),
        service_type,
        domain,
    })
}

/// Splits `<app>.<proto>.<domain>` into service type and domain.
pub fn service_type_split(type_domain: &str) -> Option<(String, String)> {
    let labels = split_labels(type_domain)?;
    if labels.len() < 3 {
        return None;
    }
    let service_type = format!("{}.{}", escape_label(&labels[0]), escape_label(&labels[1]));
    if !is_valid_service_type(&service_type) {
        return None;
    }
    let domain = labels[2..]
        .iter()
        .map(|l| escape_label(l))
        .collect::<Vec<_>>()
        .join(".");
    Some((service_type, domain))
}

/// Returns the reverse-lookup name for an address (`in-addr.arpa` / `ip6.arpa`).
pub fn reverse_lookup_name(address: &IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let mut out = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                out.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
            }
            out.push_str("ip6.arpa");
            out
        }
    }
}
