use std::fmt::{self, Display};

/// Address of a random choice: a single component or a path of components.
///
/// Paths are kept flat, so `join` never nests a `Path` inside another one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    Symbol(String),
    Index(i32),
    Path(Vec<Address>),
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::Symbol(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address::Symbol(s)
    }
}

impl From<i32> for Address {
    fn from(i: i32) -> Self {
        Address::Index(i)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Symbol(s) => write!(f, "{}", s),
            Address::Index(i) => write!(f, "{}", i),
            Address::Path(path) if path.is_empty() => write!(f, "<root>"),
            Address::Path(path) => write!(
                f,
                "{}",
                path.iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join("/")
            ),
        }
    }
}

impl Address {
    /// The empty path, addressing the root of a choice map.
    pub fn root() -> Self {
        Address::Path(vec![])
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Address::Path(p) if p.iter().all(|a| a.is_root()))
    }

    /// Flattened single-component segments of this address.
    pub fn segments(&self) -> Vec<Address> {
        match self {
            Address::Path(components) => components.iter().flat_map(|c| c.segments()).collect(),
            single => vec![single.clone()],
        }
    }

    /// Build an address from segments, collapsing one-element paths.
    pub fn from_segments(mut segments: Vec<Address>) -> Self {
        if segments.len() == 1 {
            segments.remove(0)
        } else {
            Address::Path(segments)
        }
    }

    /// `self` followed by `other`.
    pub fn join(&self, other: &Address) -> Address {
        let mut segments = self.segments();
        segments.extend(other.segments());
        Address::from_segments(segments)
    }
}

/// A set of addresses, used to split choice maps and project scores.
///
/// Selecting an address selects everything below it as well, so a
/// selection is a prefix tree whose leaves are `All` or `None`.
#[derive(Clone, PartialEq, Debug)]
pub enum Selection {
    All,
    None,
    /// Descend into one segment; every other segment is unselected.
    Under(Address, Box<Selection>),
    Not(Box<Selection>),
    Union(Vec<Selection>),
    Intersection(Vec<Selection>),
}

impl Selection {
    /// Everything at and below `addr`.
    pub fn at(addr: impl Into<Address>) -> Selection {
        addr.into()
            .segments()
            .into_iter()
            .rev()
            .fold(Selection::All, |inner, seg| {
                Selection::Under(seg, Box::new(inner))
            })
    }

    /// Everything at and below each of the given addresses.
    pub fn from_addresses<A: Into<Address>>(addrs: impl IntoIterator<Item = A>) -> Selection {
        addrs
            .into_iter()
            .map(Selection::at)
            .fold(Selection::None, |acc, s| acc | s)
    }

    /// Whether the current position is selected.
    pub fn check(&self) -> bool {
        match self {
            Selection::All => true,
            Selection::None | Selection::Under(..) => false,
            Selection::Not(inner) => !inner.check(),
            Selection::Union(members) => members.iter().any(Selection::check),
            Selection::Intersection(members) => members.iter().all(Selection::check),
        }
    }

    /// The selection seen from below `addr`.
    pub fn call(&self, addr: &Address) -> Selection {
        addr.segments()
            .iter()
            .fold(self.clone(), |sel, seg| sel.step(seg))
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.call(addr).check()
    }

    /// Whether nothing at or below the current position can be selected.
    pub fn is_none(&self) -> bool {
        matches!(self, Selection::None)
    }

    fn step(&self, seg: &Address) -> Selection {
        match self {
            Selection::All | Selection::None => self.clone(),
            Selection::Under(head, inner) if head == seg => (**inner).clone(),
            Selection::Under(..) => Selection::None,
            Selection::Not(inner) => !inner.step(seg),
            Selection::Union(members) => members
                .iter()
                .fold(Selection::None, |acc, m| acc | m.step(seg)),
            Selection::Intersection(members) => members
                .iter()
                .fold(Selection::All, |acc, m| acc & m.step(seg)),
        }
    }
}

impl std::ops::BitOr for Selection {
    type Output = Selection;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Selection::All, _) | (_, Selection::All) => Selection::All,
            (Selection::None, s) | (s, Selection::None) => s,
            (a, b) if a == b => a,
            (Selection::Union(mut members), Selection::Union(more)) => {
                for m in more {
                    if !members.contains(&m) {
                        members.push(m);
                    }
                }
                Selection::Union(members)
            }
            (Selection::Union(mut members), s) | (s, Selection::Union(mut members)) => {
                if !members.contains(&s) {
                    members.push(s);
                }
                Selection::Union(members)
            }
            (a, b) => Selection::Union(vec![a, b]),
        }
    }
}

impl std::ops::BitAnd for Selection {
    type Output = Selection;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Selection::None, _) | (_, Selection::None) => Selection::None,
            (Selection::All, s) | (s, Selection::All) => s,
            (a, b) if a == b => a,
            (Selection::Intersection(mut members), Selection::Intersection(more)) => {
                for m in more {
                    if !members.contains(&m) {
                        members.push(m);
                    }
                }
                Selection::Intersection(members)
            }
            (Selection::Intersection(mut members), s)
            | (s, Selection::Intersection(mut members)) => {
                if !members.contains(&s) {
                    members.push(s);
                }
                Selection::Intersection(members)
            }
            (a, b) => Selection::Intersection(vec![a, b]),
        }
    }
}

impl std::ops::Not for Selection {
    type Output = Selection;

    fn not(self) -> Self::Output {
        match self {
            Selection::All => Selection::None,
            Selection::None => Selection::All,
            Selection::Not(inner) => *inner,
            other => Selection::Not(Box::new(other)),
        }
    }
}

/// Create a symbol address.
#[macro_export]
macro_rules! sym {
    ($x:ident) => {
        $crate::Address::Symbol(stringify!($x).to_string())
    };
    ($x:expr) => {
        $crate::Address::Symbol($x.to_string())
    };
}

/// Create a path address.
#[macro_export]
macro_rules! path {
    () => {
        $crate::Address::Path(vec![])
    };
    ($($x:ident),+ $(,)?) => {
        $crate::Address::Path(vec![$($crate::sym!($x)),+])
    };
    ($($x:expr),+ $(,)?) => {
        $crate::Address::Path(vec![$($x),+])
    };
}

/// Create a selection of everything under a path, e.g. `s!(x)` or `s!(z, y)`.
#[macro_export]
macro_rules! s {
    ($($x:ident),+ $(,)?) => {
        $crate::Selection::at($crate::path!($($x),+))
    };
}
