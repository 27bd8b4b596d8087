use std::collections::BTreeSet;
use std::fmt;

/// Wraps a [`BTreeSet`] to give it a compact, comma-separated [`Display`](fmt::Display) impl,
/// useful for logging small sets of IDs without `Debug`'s brace-and-quote noise.
pub struct DisplayBTreeSet<'a, T>(pub &'a BTreeSet<T>);

impl<T> fmt::Display for DisplayBTreeSet<'_, T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut items = self.0.iter();

        if let Some(first) = items.next() {
            write!(f, "{first}")?;
        }

        for item in items {
            write!(f, ", {item}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_comma_separated() {
        let set = BTreeSet::from([3, 1, 2]);

        assert_eq!(DisplayBTreeSet(&set).to_string(), "1, 2, 3");
    }

    #[test]
    fn empty_set_is_empty_string() {
        let set: BTreeSet<u8> = BTreeSet::new();

        assert_eq!(DisplayBTreeSet(&set).to_string(), "");
    }
}
