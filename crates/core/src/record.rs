//! Resource records and lookup keys.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::Error;
use crate::domain;

pub const CLASS_IN: u16 = 1;
pub const CLASS_ANY: u16 = 255;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_HINFO: u16 = 13;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_OPT: u16 = 41;
pub const TYPE_TKEY: u16 = 249;
pub const TYPE_TSIG: u16 = 250;
pub const TYPE_IXFR: u16 = 251;
pub const TYPE_AXFR: u16 = 252;
pub const TYPE_ANY: u16 = 255;

/// Returns the mnemonic for a record type (`TYPE<n>` when unknown).
pub fn type_to_string(rtype: u16) -> Cow<'static, str> {
    match rtype {
        TYPE_A => "A".into(),
        TYPE_NS => "NS".into(),
        TYPE_CNAME => "CNAME".into(),
        TYPE_PTR => "PTR".into(),
        TYPE_HINFO => "HINFO".into(),
        TYPE_TXT => "TXT".into(),
        TYPE_AAAA => "AAAA".into(),
        TYPE_SRV => "SRV".into(),
        TYPE_OPT => "OPT".into(),
        TYPE_ANY => "ANY".into(),
        other => format!("TYPE{other}").into(),
    }
}

/// Returns the mnemonic for a record class (`CLASS<n>` when unknown).
pub fn class_to_string(class: u16) -> Cow<'static, str> {
    match class {
        CLASS_IN => "IN".into(),
        CLASS_ANY => "ANY".into(),
        other => format!("CLASS{other}").into(),
    }
}

/// The `(name, class, type)` identity used for matching and deduplication.
///
/// Names compare ASCII case-insensitively. A key with class or type `ANY`
/// is a pattern and matches every concrete key it covers.
#[derive(Debug, Clone)]
pub struct Key {
    name: String,
    class: u16,
    rtype: u16,
}

impl Key {
    pub fn new(name: &str, class: u16, rtype: u16) -> Self {
        Self {
            name: domain::canonical(name),
            class,
            rtype,
        }
    }

    /// Shorthand for an `IN` class key.
    pub fn in_class(name: &str, rtype: u16) -> Self {
        Self::new(name, CLASS_IN, rtype)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> u16 {
        self.class
    }

    pub fn rtype(&self) -> u16 {
        self.rtype
    }

    /// Returns true if this key contains a wildcard class or type.
    pub fn is_pattern(&self) -> bool {
        self.class == CLASS_ANY || self.rtype == TYPE_ANY
    }

    /// Returns true if `other` (a concrete key) is covered by this key.
    pub fn matches(&self, other: &Key) -> bool {
        (self.class == CLASS_ANY || self.class == other.class)
            && (self.rtype == TYPE_ANY || self.rtype == other.rtype)
            && domain::names_equal(&self.name, &other.name)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !domain::is_valid_domain_name(&self.name) {
            return Err(Error::InvalidKey(format!("invalid name: {}", self.name)));
        }
        Ok(())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.rtype == other.rtype
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        domain::hash_name(&self.name, state);
        self.class.hash(state);
        self.rtype.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{} {}",
            self.name,
            class_to_string(self.class),
            type_to_string(self.rtype)
        )
    }
}

/// A list of TXT strings (`key=value` by DNS-SD convention).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TxtList(Vec<Vec<u8>>);

impl TxtList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            items
                .into_iter()
                .map(|s| s.as_ref().as_bytes().to_vec())
                .collect(),
        )
    }

    pub fn push(&mut self, item: impl Into<Vec<u8>>) {
        self.0.push(item.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up the value of a `key=value` entry. A bare `key` yields an
    /// empty value.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.iter().find_map(|item| {
            let (k, v) = match item.iter().position(|b| *b == b'=') {
                Some(pos) => (&item[..pos], &item[pos + 1..]),
                None => (item, &item[item.len()..]),
            };
            k.eq_ignore_ascii_case(key.as_bytes()).then_some(v)
        })
    }
}

impl fmt::Display for TxtList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "\"{}\"", String::from_utf8_lossy(item))?;
        }
        Ok(())
    }
}

/// Decoded record data.
///
/// Equality and hashing treat embedded names (PTR, CNAME and SRV targets)
/// the way DNS does: ignoring ASCII case and escaping differences.
#[derive(Debug, Clone)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Cname(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt(TxtList),
    Hinfo {
        cpu: String,
        os: String,
    },
    /// Raw rdata for any type without a decoded form.
    Generic(Vec<u8>),
}

impl RecordData {
    /// Address data for an A/AAAA record.
    pub fn address(address: IpAddr) -> Self {
        match address {
            IpAddr::V4(v4) => Self::A(v4),
            IpAddr::V6(v6) => Self::Aaaa(v6),
        }
    }

    /// The record type this data implies, `None` for generic data.
    pub fn rtype(&self) -> Option<u16> {
        match self {
            Self::A(_) => Some(TYPE_A),
            Self::Aaaa(_) => Some(TYPE_AAAA),
            Self::Ptr(_) => Some(TYPE_PTR),
            Self::Cname(_) => Some(TYPE_CNAME),
            Self::Srv { .. } => Some(TYPE_SRV),
            Self::Txt(_) => Some(TYPE_TXT),
            Self::Hinfo { .. } => Some(TYPE_HINFO),
            Self::Generic(_) => None,
        }
    }

    pub fn as_address(&self) -> Option<IpAddr> {
        match self {
            Self::A(v4) => Some(IpAddr::V4(*v4)),
            Self::Aaaa(v6) => Some(IpAddr::V6(*v6)),
            _ => None,
        }
    }

    /// The domain name this data points at (PTR/CNAME target, SRV target).
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Ptr(t) | Self::Cname(t) => Some(t),
            Self::Srv { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Data equality with embedded names compared case-insensitively.
    pub fn equivalent(&self, other: &RecordData) -> bool {
        self == other
    }

    fn normalized(self) -> Self {
        match self {
            Self::Ptr(t) => Self::Ptr(domain::canonical(&t)),
            Self::Cname(t) => Self::Cname(domain::canonical(&t)),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => Self::Srv {
                priority,
                weight,
                port,
                target: domain::canonical(&target),
            },
            other => other,
        }
    }
}

/// Hash form of an embedded name, consistent with [`domain::names_equal`].
fn folded(name: &str) -> String {
    domain::canonical(name).to_ascii_lowercase()
}

impl PartialEq for RecordData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::A(a), Self::A(b)) => a == b,
            (Self::Aaaa(a), Self::Aaaa(b)) => a == b,
            (Self::Ptr(a), Self::Ptr(b)) | (Self::Cname(a), Self::Cname(b)) => {
                domain::names_equal(a, b)
            }
            (
                Self::Srv {
                    priority: p1,
                    weight: w1,
                    port: o1,
                    target: t1,
                },
                Self::Srv {
                    priority: p2,
                    weight: w2,
                    port: o2,
                    target: t2,
                },
            ) => p1 == p2 && w1 == w2 && o1 == o2 && domain::names_equal(t1, t2),
            (Self::Txt(a), Self::Txt(b)) => a == b,
            (Self::Hinfo { cpu: c1, os: o1 }, Self::Hinfo { cpu: c2, os: o2 }) => {
                c1 == c2 && o1 == o2
            }
            (Self::Generic(a), Self::Generic(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for RecordData {}

impl Hash for RecordData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::A(a) => a.hash(state),
            Self::Aaaa(a) => a.hash(state),
            Self::Ptr(t) | Self::Cname(t) => folded(t).hash(state),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                priority.hash(state);
                weight.hash(state);
                port.hash(state);
                folded(target).hash(state);
            }
            Self::Txt(txt) => txt.hash(state),
            Self::Hinfo { cpu, os } => {
                cpu.hash(state);
                os.hash(state);
            }
            Self::Generic(bytes) => bytes.hash(state),
        }
    }
}

impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(a) => write!(f, "{a}"),
            Self::Aaaa(a) => write!(f, "{a}"),
            Self::Ptr(t) | Self::Cname(t) => f.write_str(t),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {target}"),
            Self::Txt(txt) => write!(f, "{txt}"),
            Self::Hinfo { cpu, os } => write!(f, "\"{cpu}\" \"{os}\""),
            Self::Generic(bytes) => write!(f, "\\# {} {}", bytes.len(), hex::encode(bytes)),
        }
    }
}

/// An immutable resource record.
///
/// Equality and hashing cover the key and the data but not the TTL, so a
/// refreshed announcement compares equal to the original.
#[derive(Debug, Clone)]
pub struct Record {
    key: Key,
    ttl: u32,
    data: RecordData,
}

impl Record {
    /// Creates an `IN` class record whose type is implied by `data`.
    ///
    /// Generic data gets type 0 here; use [`Record::generic`] for raw rdata.
    pub fn new(name: &str, ttl: u32, data: RecordData) -> Self {
        let rtype = data.rtype().unwrap_or(0);
        Self {
            key: Key::new(name, CLASS_IN, rtype),
            ttl,
            data: data.normalized(),
        }
    }

    /// Creates a record with raw rdata for an arbitrary class and type.
    pub fn generic(name: &str, class: u16, rtype: u16, ttl: u32, rdata: Vec<u8>) -> Self {
        Self {
            key: Key::new(name, class, rtype),
            ttl,
            data: RecordData::Generic(rdata),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn name(&self) -> &str {
        self.key.name()
    }

    pub fn class(&self) -> u16 {
        self.key.class()
    }

    pub fn rtype(&self) -> u16 {
        self.key.rtype()
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    /// Returns a copy with a different TTL.
    pub fn with_ttl(&self, ttl: u32) -> Self {
        Self {
            ttl,
            ..self.clone()
        }
    }

    /// A TTL of zero announces the record's withdrawal.
    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }

    /// Shared records may legitimately be announced by several hosts at
    /// once; everything else is unique to its owner.
    pub fn is_shared(&self) -> bool {
        self.rtype() == TYPE_PTR
    }

    /// True if `other` claims this record's key with incompatible data.
    pub fn conflicts_with(&self, other: &Record) -> bool {
        !self.is_shared() && self.key == other.key && !self.data.equivalent(&other.data)
    }

    /// Returns a copy with `old` host FQDN replaced by `new` wherever it
    /// appears as owner name or target, or `None` if nothing changed.
    pub(crate) fn rename_host(&self, old: &str, new: &str) -> Option<Record> {
        let name_hit = domain::names_equal(self.name(), old);
        let target_hit = self
            .data
            .target()
            .is_some_and(|t| domain::names_equal(t, old));
        if !name_hit && !target_hit {
            return None;
        }

        let name = if name_hit { new } else { self.name() };
        let data = match &self.data {
            RecordData::Ptr(_) if target_hit => RecordData::Ptr(new.to_string()),
            RecordData::Cname(_) if target_hit => RecordData::Cname(new.to_string()),
            RecordData::Srv {
                priority,
                weight,
                port,
                ..
            } if target_hit => RecordData::Srv {
                priority: *priority,
                weight: *weight,
                port: *port,
                target: new.to_string(),
            },
            other => other.clone(),
        };
        Some(Self {
            key: Key::new(name, self.class(), self.rtype()),
            ttl: self.ttl,
            data: data.normalized(),
        })
    }

    /// Checks that the record can be published.
    pub fn validate(&self) -> Result<(), Error> {
        if self.class() != CLASS_IN {
            return Err(Error::InvalidRecord(format!(
                "unsupported class {}",
                class_to_string(self.class())
            )));
        }
        if matches!(
            self.rtype(),
            0 | TYPE_OPT | TYPE_TKEY | TYPE_TSIG | TYPE_IXFR | TYPE_AXFR | TYPE_ANY
        ) {
            return Err(Error::InvalidRecord(format!(
                "type {} cannot be published",
                type_to_string(self.rtype())
            )));
        }
        if let Some(implied) = self.data.rtype()
            && implied != self.rtype()
        {
            return Err(Error::InvalidRecord(format!(
                "data of type {} under key type {}",
                type_to_string(implied),
                type_to_string(self.rtype())
            )));
        }
        if !domain::is_valid_domain_name(self.name()) {
            return Err(Error::InvalidRecord(format!("invalid name: {}", self.name())));
        }
        if self.ttl == 0 {
            return Err(Error::InvalidRecord("zero TTL".into()));
        }
        if let Some(target) = self.data.target()
            && !domain::is_valid_domain_name(target)
        {
            return Err(Error::InvalidRecord(format!("invalid target: {target}")));
        }
        match &self.data {
            RecordData::Txt(txt) if txt.iter().any(|s| s.len() > 255) => {
                Err(Error::InvalidRecord("TXT string longer than 255 bytes".into()))
            }
            RecordData::Hinfo { cpu, os } if cpu.len() > 255 || os.len() > 255 => {
                Err(Error::InvalidRecord("HINFO string longer than 255 bytes".into()))
            }
            RecordData::Generic(bytes) if bytes.len() > usize::from(u16::MAX) => {
                Err(Error::InvalidRecord("rdata too long".into()))
            }
            _ => Ok(()),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.data == other.data
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.data.hash(state);
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{} {}\t{}",
            self.name(),
            self.ttl,
            class_to_string(self.class()),
            type_to_string(self.rtype()),
            self.data
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv(target: &str, port: u16) -> RecordData {
        RecordData::Srv {
            priority: 0,
            weight: 0,
            port,
            target: target.into(),
        }
    }

    #[test]
    fn key_equality_ignores_case_and_root_dot() {
        let a = Key::in_class("_http._tcp.local.", TYPE_PTR);
        let b = Key::in_class("_HTTP._tcp.LOCAL", TYPE_PTR);
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn pattern_key_matches() {
        let any = Key::new("host.local", CLASS_IN, TYPE_ANY);
        assert!(any.is_pattern());
        assert!(any.matches(&Key::in_class("HOST.local", TYPE_A)));
        assert!(!any.matches(&Key::in_class("other.local", TYPE_A)));
        assert!(!Key::in_class("host.local", TYPE_A).matches(&Key::in_class("host.local", TYPE_AAAA)));
    }

    #[test]
    fn text_form() {
        let r = Record::new("foo.local", 120, RecordData::A("192.168.1.2".parse().unwrap()));
        assert_eq!(r.to_string(), "foo.local\t120\tIN A\t192.168.1.2");

        let s = Record::new("Test._http._tcp.local", 120, srv("foo.local.", 80));
        assert_eq!(s.to_string(), "Test._http._tcp.local\t120\tIN SRV\t0 0 80 foo.local");

        let t = Record::new("x.local", 4500, RecordData::Txt(TxtList::from_strings(["foo", "a=b"])));
        assert_eq!(t.to_string(), "x.local\t4500\tIN TXT\t\"foo\" \"a=b\"");

        let g = Record::generic("x.local", 3, 99, 10, vec![0xde, 0xad]);
        assert_eq!(g.to_string(), "x.local\t10\tCLASS3 TYPE99\t\\# 2 dead");
    }

    #[test]
    fn equality_ignores_ttl() {
        let a = Record::new("foo.local", 120, RecordData::Ptr("bar.local".into()));
        let b = a.with_ttl(0);
        assert_eq!(a, b);
        assert!(b.is_goodbye());
    }

    #[test]
    fn data_names_compare_like_dns() {
        use std::collections::HashSet;

        let plain = Record::new("_http._tcp.local", 4500, RecordData::Ptr("Foo\\ Bar._http._tcp.local".into()));
        let decimal = Record::new("_http._tcp.local", 4500, RecordData::Ptr("FOO\\032bar._http._tcp.local.".into()));
        assert_eq!(plain.data().target(), Some("Foo Bar._http._tcp.local"));
        assert_eq!(plain, decimal);

        let set: HashSet<Record> = [plain, decimal].into_iter().collect();
        assert_eq!(set.len(), 1);

        assert_eq!(srv("Me.local", 80), srv("me.LOCAL.", 80));
        assert_ne!(srv("me.local", 80), srv("me.local", 81));
    }

    #[test]
    fn conflicts_only_for_unique_records() {
        let mine = Record::new("svc._http._tcp.local", 120, srv("me.local", 80));
        let theirs = Record::new("svc._http._tcp.local", 120, srv("them.local", 80));
        let echo = Record::new("SVC._http._tcp.local", 120, srv("ME.local", 80));
        assert!(mine.conflicts_with(&theirs));
        assert!(!mine.conflicts_with(&echo));

        let p1 = Record::new("_http._tcp.local", 4500, RecordData::Ptr("a._http._tcp.local".into()));
        let p2 = Record::new("_http._tcp.local", 4500, RecordData::Ptr("b._http._tcp.local".into()));
        assert!(!p1.conflicts_with(&p2));
    }

    #[test]
    fn validation() {
        let ok = Record::new("foo.local", 120, RecordData::A("10.0.0.1".parse().unwrap()));
        assert!(ok.validate().is_ok());

        let chaos = Record::generic("foo.local", 3, TYPE_TXT, 120, vec![]);
        assert!(matches!(chaos.validate(), Err(Error::InvalidRecord(_))));

        let meta = Record::generic("foo.local", CLASS_IN, TYPE_OPT, 120, vec![]);
        assert!(matches!(meta.validate(), Err(Error::InvalidRecord(_))));

        let zero = ok.with_ttl(0);
        assert!(matches!(zero.validate(), Err(Error::InvalidRecord(_))));

        let bad_target = Record::new("foo.local", 120, RecordData::Ptr("a..b".into()));
        assert!(matches!(bad_target.validate(), Err(Error::InvalidRecord(_))));

        let untyped = Record::new("foo.local", 120, RecordData::Generic(vec![1]));
        assert!(matches!(untyped.validate(), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn rename_host_rewrites_owner_and_targets() {
        let a = Record::new("old.local", 120, RecordData::A("10.0.0.1".parse().unwrap()));
        let renamed = a.rename_host("old.local", "new.local").unwrap();
        assert_eq!(renamed.name(), "new.local");

        let s = Record::new("svc._http._tcp.local", 120, srv("OLD.local", 80));
        let renamed = s.rename_host("old.local", "new.local").unwrap();
        assert_eq!(renamed.data().target(), Some("new.local"));

        let other = Record::new("x.local", 120, RecordData::Ptr("y.local".into()));
        assert!(other.rename_host("old.local", "new.local").is_none());
    }

    #[test]
    fn txt_lookup() {
        let txt = TxtList::from_strings(["path=/index.html", "flag"]);
        assert_eq!(txt.get("path"), Some(&b"/index.html"[..]));
        assert_eq!(txt.get("FLAG"), Some(&b""[..]));
        assert_eq!(txt.get("missing"), None);
    }
}
