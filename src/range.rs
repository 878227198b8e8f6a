use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt};

/// Inclusive numeric interval.
///
/// Used for the plausibility screen: a measurement is kept only if `min <= value <= max`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Band where the lower bound is inclusive, the upper bound is exclusive or unbounded.
#[derive(Copy, Clone, Serialize, Deserialize)]
pub struct Band<T>(T, Option<T>);

impl<T> Band<T>
where
    T: Ord,
{
    pub fn new(from: T, to: Option<T>) -> Self {
        if let Some(ref to) = to {
            if from >= *to {
                panic!("bands must go from low to high")
            }
        }
        Band(from, to)
    }

    pub fn contains(&self, val: &T) -> bool {
        if let Some(end) = &self.1 {
            val >= &self.0 && val < end
        } else {
            val >= &self.0
        }
    }
}

impl<T> fmt::Display for Band<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(end) = &self.1 {
            write!(f, "{} - {}", self.0, end)
        } else {
            write!(f, "{}+", self.0)
        }
    }
}

/// An ordered list of bands to bucket a population into.
#[derive(Clone, Serialize, Deserialize)]
pub struct BandSet<T> {
    bands: Vec<Band<T>>,
}

impl<T> BandSet<T> {
    pub fn new(bands: Vec<Band<T>>) -> Self {
        Self { bands }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Band<T>> + '_ {
        self.bands.iter()
    }
}

impl BandSet<u16> {
    /// Decade bands `0 - 10`, `10 - 20`, ..., ending with an open `top+` band.
    pub fn decades(top: u16) -> Self {
        assert!(top > 0 && top % 10 == 0);
        let mut bands = Vec::with_capacity(usize::from(top / 10) + 1);
        for lo in (0..top).step_by(10) {
            bands.push(Band::new(lo, Some(lo + 10)));
        }
        bands.push(Band::new(top, None));
        Self { bands }
    }
}

impl<T> BandSet<T>
where
    T: Ord,
{
    /// Count values per band; values that fall in no band or are `None` land in the missing
    /// bucket.
    pub fn bucket<I, B>(self, values: I) -> BandCounts<T>
    where
        I: Iterator<Item = Option<B>>,
        B: Borrow<T>,
    {
        let mut counts = vec![0usize; self.bands.len()];
        let mut missing = 0usize;
        for value in values {
            let Some(value) = value else {
                missing += 1;
                continue;
            };
            let mut bucketed = false;
            for (idx, band) in self.bands.iter().enumerate() {
                if band.contains(value.borrow()) {
                    counts[idx] += 1;
                    bucketed = true;
                    break;
                }
            }
            if !bucketed {
                missing += 1;
            }
        }
        BandCounts {
            set: self,
            counts,
            missing,
        }
    }
}

/// A band set with values bucketed and bucket sizes recorded.
pub struct BandCounts<T> {
    set: BandSet<T>,
    counts: Vec<usize>,
    missing: usize,
}

impl<T> BandCounts<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&Band<T>, usize)> {
        self.set.iter().zip(self.counts.iter().copied())
    }

    pub fn missing(&self) -> usize {
        self.missing
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum::<usize>() + self.missing
    }
}
