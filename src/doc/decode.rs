//! Sentinel-driven record decoding.
//!
//! Records are delimited by `StartClass` / `EndClass` sentinel keys at the
//! document root; the mapping under each `StartClass` opens with a mandatory
//! `ClassName` pair naming the record type. Decoding walks the root entry
//! list with an explicit cursor so that aggregates (channel tables, annotation
//! lists) can chain record decodes and dispatch on the next class name.
//!
//! Field assignment is table-driven: each record type declares a static match
//! from wire key to typed field (see [`super::records`]), with an
//! `assign_unknown` hook for flattened dotted names and polymorphic vertex
//! vectors. Scalar coercion is deliberately lenient: a field that fails to
//! parse, or an integer that overflows 32 bits, is logged and left at its
//! default so one damaged attribute cannot poison a whole capture.

use std::str::FromStr;

use tracing::{trace, warn};

use super::{unescape, Document, Value};

/// Sentinel key opening a record.
const START_CLASS: &str = "StartClass";

/// Sentinel key closing a record.
const END_CLASS: &str = "EndClass";

/// Mandatory leading attribute naming the record type.
const CLASS_NAME: &str = "ClassName";

// =============================================================================
// Record trait
// =============================================================================

/// A typed record decodable from a `StartClass` block.
pub trait Record: Default {
    /// The class name the acquisition software writes for this record.
    const CLASS_NAME: &'static str;

    /// Assign a declared field from its wire key.
    ///
    /// Returns `false` when the key does not name a declared field, in which
    /// case the decoder forwards the pair to [`Record::assign_unknown`].
    fn assign(&mut self, key: &str, value: &Value) -> bool;

    /// Receive attributes whose keys match no declared field.
    ///
    /// Used for flattened compound names such as `mStageOffsetMicrons.mX`
    /// and for vertex vectors whose key varies by annotation kind.
    fn assign_unknown(&mut self, _key: &str, _value: &Value) {}
}

/// Outcome of one record decode attempt.
#[derive(Debug)]
pub enum DecodeStep<T> {
    /// A matching record was decoded; `next` indexes past its `EndClass`.
    Matched { record: T, next: usize },
    /// The next record belongs to a different class; the cursor is unchanged.
    NotThisClass,
    /// `EndClass` or the end of the document was reached without a record.
    EndOfRecords,
}

impl<T> DecodeStep<T> {
    /// The decoded record and continuation cursor, if matched.
    pub fn into_matched(self) -> Option<(T, usize)> {
        match self {
            DecodeStep::Matched { record, next } => Some((record, next)),
            _ => None,
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode the next record of type `T` starting at entry `start`.
///
/// Entries before the next `StartClass` are skipped. If the class block names
/// a different type the cursor is left unchanged and `NotThisClass` is
/// returned, so aggregates can probe sibling record types in turn.
pub fn decode_record<T: Record>(doc: &Document, start: usize) -> DecodeStep<T> {
    let entries = doc.entries();
    let mut index = start;

    while index < entries.len() {
        let (key, value) = &entries[index];
        if key == END_CLASS {
            return DecodeStep::EndOfRecords;
        }
        if key != START_CLASS {
            index += 1;
            continue;
        }

        let attributes = match value.as_mapping() {
            Some(attributes) => attributes,
            None => {
                warn!(index, "StartClass entry is not a mapping");
                return DecodeStep::NotThisClass;
            }
        };

        match attributes.first() {
            Some((name, Value::Scalar(class))) if name == CLASS_NAME => {
                if class != T::CLASS_NAME {
                    trace!(found = %class, expected = T::CLASS_NAME, "class mismatch");
                    return DecodeStep::NotThisClass;
                }
            }
            _ => {
                warn!(index, "StartClass block does not open with ClassName");
                return DecodeStep::NotThisClass;
            }
        }

        let mut record = T::default();
        for (attr_key, attr_value) in &attributes[1..] {
            if !record.assign(attr_key, attr_value) && attr_key != CLASS_NAME {
                record.assign_unknown(attr_key, attr_value);
            }
        }

        // Consume through the record's EndClass sentinel.
        let mut next = index + 1;
        while next < entries.len() {
            if entries[next].0 == END_CLASS {
                next += 1;
                break;
            }
            next += 1;
        }
        return DecodeStep::Matched { record, next };
    }

    DecodeStep::EndOfRecords
}

/// Locate the next `StartClass` without consuming it.
///
/// Returns the class name and the entry index of the sentinel, or `None` when
/// `EndClass`, a malformed block, or the end of the document intervenes.
pub fn find_next_class(doc: &Document, start: usize) -> Option<(&str, usize)> {
    let entries = doc.entries();
    for (index, (key, value)) in entries.iter().enumerate().skip(start) {
        if key == END_CLASS {
            return None;
        }
        if key != START_CLASS {
            continue;
        }
        return match value.as_mapping().and_then(|attrs| attrs.first()) {
            Some((name, Value::Scalar(class))) if name == CLASS_NAME => {
                Some((class.as_str(), index))
            }
            _ => None,
        };
    }
    None
}

// =============================================================================
// Keyed scalar lookups
// =============================================================================

/// Scan forward for `key` and parse its scalar value as an integer.
///
/// Returns the value and the index one past the matched entry. Entries with
/// non-scalar values are skipped; an unparseable match is treated as absent.
pub fn get_integer(doc: &Document, start: usize, key: &str) -> Option<(i64, usize)> {
    let (text, next) = get_string(doc, start, key, false)?;
    match text.trim().parse::<i64>() {
        Ok(value) => Some((value, next)),
        Err(_) => {
            warn!(key, value = %text, "integer value failed to parse");
            None
        }
    }
}

/// Scan forward for `key` and return its scalar value.
///
/// Returns the value and the index one past the matched entry.
pub fn get_string(
    doc: &Document,
    start: usize,
    key: &str,
    restore_special: bool,
) -> Option<(String, usize)> {
    let entries = doc.entries();
    for (index, (entry_key, value)) in entries.iter().enumerate().skip(start) {
        if entry_key != key {
            continue;
        }
        match value.as_scalar() {
            Some(text) => {
                let text = if restore_special {
                    unescape(text)
                } else {
                    text.to_string()
                };
                return Some((text, index + 1));
            }
            None => continue,
        }
    }
    None
}

// =============================================================================
// Typed arrays
// =============================================================================

fn typed_array<T: FromStr + Default>(value: &Value, label: &str, first_is_count: bool) -> Vec<T> {
    let items = match value.as_sequence() {
        Some(items) => items,
        None => {
            warn!(label, "expected a sequence value");
            return Vec::new();
        }
    };
    if items.is_empty() {
        return Vec::new();
    }

    let offset = usize::from(first_is_count);
    if first_is_count {
        let declared = items[0].trim().parse::<i64>().unwrap_or(-1);
        if declared != (items.len() - 1) as i64 {
            warn!(
                label,
                declared,
                actual = items.len() - 1,
                "sequence length header disagrees with element count"
            );
        }
    }

    items[offset..]
        .iter()
        .map(|item| {
            item.trim().parse::<T>().unwrap_or_else(|_| {
                warn!(label, value = %item, "sequence element failed to parse");
                T::default()
            })
        })
        .collect()
}

/// Extract a 32-bit integer vector, optionally skipping a leading count.
pub fn int_array(value: &Value, label: &str, first_is_count: bool) -> Vec<i32> {
    typed_array(value, label, first_is_count)
}

/// Extract a 64-bit integer vector, optionally skipping a leading count.
pub fn long_array(value: &Value, label: &str, first_is_count: bool) -> Vec<i64> {
    typed_array(value, label, first_is_count)
}

/// Extract a 32-bit float vector, optionally skipping a leading count.
pub fn float_array(value: &Value, label: &str, first_is_count: bool) -> Vec<f32> {
    typed_array(value, label, first_is_count)
}

/// Extract a 64-bit float vector, optionally skipping a leading count.
pub fn double_array(value: &Value, label: &str, first_is_count: bool) -> Vec<f64> {
    typed_array(value, label, first_is_count)
}

/// Extract a string vector, optionally skipping a leading count and restoring
/// escaped characters.
pub fn string_array(
    value: &Value,
    label: &str,
    first_is_count: bool,
    restore_special: bool,
) -> Vec<String> {
    let raw: Vec<String> = typed_array(value, label, first_is_count);
    if restore_special {
        raw.iter().map(|s| unescape(s)).collect()
    } else {
        raw
    }
}

// =============================================================================
// Scalar field coercion
// =============================================================================

/// Lenient setters used by the record field tables.
///
/// All parse failures warn and leave the field at its default. Integer values
/// wider than 32 bits (unsigned magnitudes in the source streams) warn
/// instead of aborting the record.
pub(crate) mod coerce {
    use super::*;

    pub fn set_i32(slot: &mut i32, key: &str, value: &Value) {
        let Some(text) = value.as_scalar() else {
            trace!(key, "expected scalar for i32 field");
            return;
        };
        match text.trim().parse::<i64>() {
            Ok(wide) => match i32::try_from(wide) {
                Ok(narrow) => *slot = narrow,
                Err(_) => warn!(key, value = wide, "integer exceeds 32-bit range"),
            },
            Err(_) => warn!(key, value = %text, "integer field failed to parse"),
        }
    }

    pub fn set_i64(slot: &mut i64, key: &str, value: &Value) {
        let Some(text) = value.as_scalar() else {
            trace!(key, "expected scalar for i64 field");
            return;
        };
        match text.trim().parse::<i64>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %text, "integer field failed to parse"),
        }
    }

    pub fn set_f32(slot: &mut f32, key: &str, value: &Value) {
        let Some(text) = value.as_scalar() else {
            trace!(key, "expected scalar for f32 field");
            return;
        };
        match text.trim().parse::<f32>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %text, "float field failed to parse"),
        }
    }

    pub fn set_f64(slot: &mut f64, key: &str, value: &Value) {
        let Some(text) = value.as_scalar() else {
            trace!(key, "expected scalar for f64 field");
            return;
        };
        match text.trim().parse::<f64>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %text, "float field failed to parse"),
        }
    }

    pub fn set_bool(slot: &mut bool, _key: &str, value: &Value) {
        if let Some(text) = value.as_scalar() {
            *slot = text == "true";
        }
    }

    pub fn set_string(slot: &mut String, _key: &str, value: &Value) {
        if let Some(text) = value.as_scalar() {
            *slot = unescape(text);
        }
    }

    pub fn set_vec_i32(slot: &mut Vec<i32>, key: &str, value: &Value) {
        set_vec(slot, key, value, int_array)
    }

    pub fn set_vec_i64(slot: &mut Vec<i64>, key: &str, value: &Value) {
        set_vec(slot, key, value, long_array)
    }

    pub fn set_vec_f32(slot: &mut Vec<f32>, key: &str, value: &Value) {
        set_vec(slot, key, value, float_array)
    }

    pub fn set_vec_f64(slot: &mut Vec<f64>, key: &str, value: &Value) {
        set_vec(slot, key, value, double_array)
    }

    pub fn set_vec_bool(slot: &mut Vec<bool>, key: &str, value: &Value) {
        if let Some(items) = value.as_sequence() {
            if items.len() > 1 {
                *slot = items[1..].iter().map(|item| item == "true").collect();
            }
        }
    }

    fn set_vec<T>(
        slot: &mut Vec<T>,
        key: &str,
        value: &Value,
        extract: fn(&Value, &str, bool) -> Vec<T>,
    ) {
        if value.as_sequence().is_some() {
            *slot = extract(value, key, true);
        } else {
            trace!(key, "expected sequence for vector field");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Probe {
        count: i32,
        scale: f32,
        name: String,
        values: Vec<i32>,
        unknown_keys: Vec<String>,
    }

    impl Record for Probe {
        const CLASS_NAME: &'static str = "CProbe";

        fn assign(&mut self, key: &str, value: &Value) -> bool {
            match key {
                "mCount" => coerce::set_i32(&mut self.count, key, value),
                "mScale" => coerce::set_f32(&mut self.scale, key, value),
                "mName" => coerce::set_string(&mut self.name, key, value),
                "mValues" => coerce::set_vec_i32(&mut self.values, key, value),
                _ => return false,
            }
            true
        }

        fn assign_unknown(&mut self, key: &str, _value: &Value) {
            self.unknown_keys.push(key.to_string());
        }
    }

    fn probe_doc() -> Document {
        Document::parse(concat!(
            "StartClass:\n",
            "  ClassName: CProbe\n",
            "  mCount: 42\n",
            "  mScale: 1.5\n",
            "  mName: dapi_#58;blue\n",
            "  mValues: [3, 10, 20, 30]\n",
            "  mMystery.mX: 7\n",
            "EndClass: 0\n",
        ))
        .unwrap()
    }

    #[test]
    fn test_decode_matching_record() {
        let doc = probe_doc();
        let (probe, next) = decode_record::<Probe>(&doc, 0).into_matched().unwrap();
        assert_eq!(probe.count, 42);
        assert_eq!(probe.scale, 1.5);
        assert_eq!(probe.name, "dapi:blue");
        assert_eq!(probe.values, vec![10, 20, 30]);
        assert_eq!(probe.unknown_keys, vec!["mMystery.mX"]);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_decode_class_mismatch_leaves_cursor() {
        #[derive(Debug, Default)]
        struct Other;
        impl Record for Other {
            const CLASS_NAME: &'static str = "COther";
            fn assign(&mut self, _key: &str, _value: &Value) -> bool {
                false
            }
        }

        let doc = probe_doc();
        assert!(matches!(
            decode_record::<Other>(&doc, 0),
            DecodeStep::NotThisClass
        ));
    }

    #[test]
    fn test_decode_end_class_terminates() {
        let doc = Document::parse("EndClass: 0\n").unwrap();
        assert!(matches!(
            decode_record::<Probe>(&doc, 0),
            DecodeStep::EndOfRecords
        ));
    }

    #[test]
    fn test_decode_overflowing_integer_keeps_default() {
        let doc = Document::parse(concat!(
            "StartClass:\n",
            "  ClassName: CProbe\n",
            "  mCount: 4294967295\n",
            "EndClass: 0\n",
        ))
        .unwrap();
        let (probe, _) = decode_record::<Probe>(&doc, 0).into_matched().unwrap();
        assert_eq!(probe.count, 0);
    }

    #[test]
    fn test_find_next_class() {
        let doc = Document::parse(concat!(
            "theCount: 1\n",
            "StartClass:\n",
            "  ClassName: CProbe\n",
            "EndClass: 0\n",
        ))
        .unwrap();
        let (class, index) = find_next_class(&doc, 0).unwrap();
        assert_eq!(class, "CProbe");
        assert_eq!(index, 1);
    }

    #[test]
    fn test_find_next_class_stops_at_end_class() {
        let doc = Document::parse(concat!(
            "EndClass: 0\n",
            "StartClass:\n",
            "  ClassName: CProbe\n",
        ))
        .unwrap();
        assert!(find_next_class(&doc, 0).is_none());
    }

    #[test]
    fn test_get_integer_and_cursor() {
        let doc = Document::parse("a: 1\ntheTimepointIndex: 3\nb: 2\n").unwrap();
        let (value, next) = get_integer(&doc, 0, "theTimepointIndex").unwrap();
        assert_eq!(value, 3);
        assert_eq!(next, 2);
        assert!(get_integer(&doc, next, "theTimepointIndex").is_none());
    }

    #[test]
    fn test_get_string_restores_escapes() {
        let doc = Document::parse("theXMLDescriptor: _#60;root_#62;\n").unwrap();
        let (value, _) = get_string(&doc, 0, "theXMLDescriptor", true).unwrap();
        assert_eq!(value, "<root>");
    }

    #[test]
    fn test_array_count_mismatch_uses_actual_length() {
        let doc = Document::parse("v: [5, 1, 2]\n").unwrap();
        let values = int_array(&doc.entries()[0].1, "v", true);
        // Declared five elements, two present: warn and keep the two.
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_array_matching_count() {
        let doc = Document::parse("v: [3, 1, 2, 3]\n").unwrap();
        let values = long_array(&doc.entries()[0].1, "v", true);
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_array_without_count_prefix() {
        let doc = Document::parse("v: [1.5, 2.5, 3.5]\n").unwrap();
        let values = float_array(&doc.entries()[0].1, "v", false);
        assert_eq!(values, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_array_bad_element_defaults() {
        let doc = Document::parse("v: [2, 7, oops]\n").unwrap();
        let values = int_array(&doc.entries()[0].1, "v", true);
        assert_eq!(values, vec![7, 0]);
    }
}
