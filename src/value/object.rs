//! The capability protocol every heap-resident value must implement.

use std::fmt;
use std::io::Write;

/// Type tags 0..=5 belong to the primitive value variants; object kinds
/// report tags starting here.
pub const OBJECT_TAG_BASE: u8 = 6;

/// Capability set for heap objects: printable, convertible to string,
/// truthiness, equality, and optionally iteration. Container types live
/// outside the core but must satisfy this protocol to ride in a `Value`.
pub trait GarnetObject: fmt::Debug {
    /// The human-readable rendering used by `print`, `println`, and string
    /// casts.
    fn to_display_string(&self) -> String;

    /// Truthiness under `AsBool` coercion. Containers report false when
    /// empty.
    fn as_bool(&self) -> bool;

    /// The object's kind name, used in diagnostics.
    fn object_name(&self) -> &'static str;

    /// The object's type tag for `instanceof`, >= `OBJECT_TAG_BASE`.
    fn type_tag(&self) -> u8;

    /// Whether the object can drive a for-loop.
    fn is_iterable(&self) -> bool {
        false
    }

    /// Structural equality against another object.
    fn eq_object(&self, other: &dyn GarnetObject) -> bool;

    fn print(&self, err: bool) {
        if err {
            let _ = write!(std::io::stderr(), "{}", self.to_display_string());
        } else {
            let _ = write!(std::io::stdout(), "{}", self.to_display_string());
        }
    }

    fn print_ln(&self, err: bool) {
        if err {
            let _ = writeln!(std::io::stderr(), "{}", self.to_display_string());
        } else {
            let _ = writeln!(std::io::stdout(), "{}", self.to_display_string());
        }
    }
}
