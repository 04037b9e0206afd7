use std::cmp::Ordering;

/// A 12-byte versionstamp, as supplied by the KV store at commit time.
///
/// The last two bytes are a user-controlled "local order" suffix; the first
/// ten are filled in by the store's atomic versionstamped-key mutation. A
/// versionstamp that has not yet been resolved by a commit is represented by
/// [`VersionStamp::incomplete`] and must never be persisted as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VersionStamp(pub [u8; 12]);

impl VersionStamp {
    /// A placeholder for a versionstamp not yet assigned by the store's
    /// commit-time mutation. All-0xff in the store-assigned portion so an
    /// accidental persist of an unresolved versionstamp sorts last and is
    /// easy to spot, rather than colliding with a real low versionstamp.
    pub fn incomplete(user_version: u16) -> Self {
        let mut bytes = [0xffu8; 12];
        bytes[10..12].copy_from_slice(&user_version.to_be_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Ord for VersionStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for VersionStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One element of a tuple: the unit of ordering-preserving encoding.
///
/// `Bytes` and `Utf8` are kept distinct even though both are escaped,
/// `0x00`-terminated strings on the wire — they carry different tags so a
/// `Bytes` value and a `Utf8` value with the same content never compare
/// equal, and so decoders can hand back the right Rust type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Element {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat),
    Bytes(Vec<u8>),
    Utf8(String),
    Uuid([u8; 16]),
    VersionStamp(VersionStamp),
    Tuple(Vec<Element>),
}

/// Matches the byte-level order `codec::encode` produces: same-kind values
/// compare by their natural order, different kinds compare by tag
/// (`Null < Bytes < Utf8 < Tuple < Int < Float < Uuid < VersionStamp <
/// Bool`), not by declaration order.
impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        fn tag_rank(e: &Element) -> u8 {
            match e {
                Element::Null => 0,
                Element::Bytes(_) => 1,
                Element::Utf8(_) => 2,
                Element::Tuple(_) => 3,
                Element::Int(_) => 4,
                Element::Float(_) => 5,
                Element::Uuid(_) => 6,
                Element::VersionStamp(_) => 7,
                Element::Bool(_) => 8,
            }
        }
        match (self, other) {
            (Element::Null, Element::Null) => Ordering::Equal,
            (Element::Bool(a), Element::Bool(b)) => a.cmp(b),
            (Element::Int(a), Element::Int(b)) => a.cmp(b),
            (Element::Float(a), Element::Float(b)) => a.cmp(b),
            (Element::Bytes(a), Element::Bytes(b)) => a.cmp(b),
            (Element::Utf8(a), Element::Utf8(b)) => a.cmp(b),
            (Element::Uuid(a), Element::Uuid(b)) => a.cmp(b),
            (Element::VersionStamp(a), Element::VersionStamp(b)) => a.cmp(b),
            (Element::Tuple(a), Element::Tuple(b)) => a.cmp(b),
            _ => tag_rank(self).cmp(&tag_rank(other)),
        }
    }
}

/// Wraps `f64` with a total order matching the codec's: NaN sorts last,
/// `-0.0 < 0.0`. Plain `f64` has no `Ord` impl because it doesn't obey this,
/// so tuples containing floats need the wrapper to be comparable at all.
#[derive(Clone, Copy, Debug)]
pub struct OrderedFloat(pub f64);

impl OrderedFloat {
    fn sort_key(&self) -> u64 {
        let bits = self.0.to_bits();
        if self.0.is_sign_negative() { !bits } else { bits | (1 << 63) }
    }
}

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}
impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state)
    }
}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl From<f64> for OrderedFloat {
    fn from(v: f64) -> Self {
        OrderedFloat(v)
    }
}

impl Element {
    pub fn int(v: impl Into<i64>) -> Self {
        Element::Int(v.into())
    }

    pub fn float(v: f64) -> Self {
        Element::Float(OrderedFloat(v))
    }

    pub fn str(v: impl Into<String>) -> Self {
        Element::Utf8(v.into())
    }

    pub fn bytes(v: impl Into<Vec<u8>>) -> Self {
        Element::Bytes(v.into())
    }
}

impl From<bool> for Element {
    fn from(v: bool) -> Self {
        Element::Bool(v)
    }
}
impl From<i64> for Element {
    fn from(v: i64) -> Self {
        Element::Int(v)
    }
}
impl From<&str> for Element {
    fn from(v: &str) -> Self {
        Element::Utf8(v.to_string())
    }
}
impl From<String> for Element {
    fn from(v: String) -> Self {
        Element::Utf8(v)
    }
}
impl From<Vec<Element>> for Element {
    fn from(v: Vec<Element>) -> Self {
        Element::Tuple(v)
    }
}
