use std::fmt;
use std::ops::{Add, AddAssign, Deref};

/// An ordered instruction sequence, indexable by position.
///
/// The same container carries B-code programs, the U-code of one
/// instruction and the positions of a compiled group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code<T> {
    items: Vec<T>,
}

impl<T> Code<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn append(&mut self, other: Code<T>) {
        self.items.extend(other.items);
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> Default for Code<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for Code<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> From<Vec<T>> for Code<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T> FromIterator<T> for Code<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Code<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Code<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> Add for Code<T> {
    type Output = Code<T>;

    fn add(mut self, rhs: Code<T>) -> Code<T> {
        self.append(rhs);
        self
    }
}

impl<T> AddAssign for Code<T> {
    fn add_assign(&mut self, rhs: Code<T>) {
        self.append(rhs);
    }
}

impl<T: fmt::Display> fmt::Display for Code<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, item) in self.items.iter().enumerate() {
            writeln!(f, "{index:>4}  {item}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenation_keeps_order() {
        let a: Code<u8> = vec![1, 2].into();
        let b: Code<u8> = vec![3].into();
        let mut c = a + b;
        c += Code::from(vec![4]);
        assert_eq!(&c[..], &[1, 2, 3, 4]);
        assert_eq!(c[2], 3);
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn test_display_numbers_positions() {
        let code: Code<&str> = ["HALT"].into_iter().collect();
        assert_eq!(code.to_string(), "   0  HALT\n");
    }
}
