//! Small generic helpers lifted from `prqlc::utils`: an id generator and a
//! name generator for synthesizing fresh binding names (`$_0_0`, `$__key`,
//! `t0`, ...) during lowering and splitting.

use std::marker::PhantomData;

#[derive(Debug, Clone)]
pub struct IdGenerator<T: From<usize>> {
    next_id: usize,
    phantom: PhantomData<T>,
}

impl<T: From<usize>> IdGenerator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gen(&mut self) -> T {
        let id = self.next_id;
        self.next_id += 1;
        T::from(id)
    }
}

impl<T: From<usize>> Default for IdGenerator<T> {
    fn default() -> Self {
        IdGenerator {
            next_id: 0,
            phantom: PhantomData,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NameGenerator {
    prefix: &'static str,
    id: IdGenerator<usize>,
}

impl NameGenerator {
    pub fn new(prefix: &'static str) -> Self {
        NameGenerator {
            prefix,
            id: IdGenerator::new(),
        }
    }

    pub fn gen(&mut self) -> String {
        format!("{}{}", self.prefix, self.id.gen())
    }
}

/// Merges two options using `f`, defaulting to whichever side is `Some`
/// when the other is `None` (`prqlc::utils::OrMap`).
pub trait OrMap<T> {
    fn or_map<F: FnOnce(T, T) -> T>(self, b: Self, f: F) -> Self;
}

impl<T> OrMap<T> for Option<T> {
    fn or_map<F: FnOnce(T, T) -> T>(self, b: Self, f: F) -> Self {
        match (self, b) {
            (Some(a), Some(b)) => Some(f(a, b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}
