//! ICD-10-CM handling: code normalization, curated code lists/ranges, and the diagnosis
//! classifier injected into the diagnosis aggregator.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use once_cell::sync::Lazy;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_set, BTreeSet},
    fmt, iter, ops, str,
    sync::Arc,
};

/// The curated contraindication lists, versioned with the source.
const CONTRAINDICATIONS_CSV: &str = include_str!("../data/icd10_contraindications.csv");

/// An ICD-10-CM code in canonical form: lowercase alphanumeric, dots and whitespace stripped.
///
/// Codes are 3 (category) to 7 characters. The buffer is nul-padded so that derived ordering
/// sorts a category directly before its extensions (`i25` < `i2510` < `i26`).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Icd10Code {
    buf: [u8; 7],
    len: u8,
}

impl Icd10Code {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut buf = [0u8; 7];
        let mut len = 0usize;
        for ch in raw.bytes() {
            let ch = match ch {
                b'.' | b' ' | b'\t' => continue,
                ch if ch.is_ascii_alphanumeric() => ch.to_ascii_lowercase(),
                ch => bail!(
                    "diagnosis code \"{}\" contains invalid character {:?}",
                    raw,
                    char::from(ch)
                ),
            };
            ensure!(len < 7, "diagnosis code \"{}\" longer than 7 characters", raw);
            buf[len] = ch;
            len += 1;
        }
        ensure!(len >= 3, "diagnosis code \"{}\" shorter than 3 characters", raw);
        Ok(Self {
            buf,
            len: len as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.len)]
    }

    /// The 3-character category, the unit of range matching.
    pub fn category(&self) -> &[u8] {
        &self.buf[..3]
    }
}

impl fmt::Debug for Icd10Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&String::from_utf8_lossy(self.as_bytes()), f)
    }
}

impl fmt::Display for Icd10Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AsRef<str> for Icd10Code {
    fn as_ref(&self) -> &str {
        str::from_utf8(self.as_bytes()).expect("codes are ascii")
    }
}

impl AsRef<[u8]> for Icd10Code {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<'a> TryFrom<&'a str> for Icd10Code {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl str::FromStr for Icd10Code {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Icd10Code {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.serialize_str(self.as_ref())
    }
}

impl<'de> Deserialize<'de> for Icd10Code {
    fn deserialize<D>(deserializer: D) -> Result<Icd10Code, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(Icd10CodeVisitor)
    }
}

struct Icd10CodeVisitor;

impl<'de> serde::de::Visitor<'de> for Icd10CodeVisitor {
    type Value = Icd10Code;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an ICD-10-CM code")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Icd10Code::parse(v).map_err(serde::de::Error::custom)
    }
}

/// Accepted values of `diagnosis_code_format` (already lowercased at load).
pub fn format_is_icd10(format: &str) -> bool {
    matches!(format, "icd10" | "icd10cm")
}

/// Inclusive range of 3-character categories, e.g. I20–I25.
///
/// A code matches when its category falls lexicographically inside the range; extensions
/// (`i2510` for `i25`) match through their category.
#[derive(Debug, Copy, Clone)]
pub struct CodeRange {
    lo: [u8; 3],
    hi: [u8; 3],
}

impl CodeRange {
    pub fn new(lo: &str, hi: &str) -> Result<Self> {
        let lo = category_bytes(lo)?;
        let hi = category_bytes(hi)?;
        ensure!(lo <= hi, "code range bounds out of order");
        Ok(Self { lo, hi })
    }

    pub fn contains(&self, code: &Icd10Code) -> bool {
        let category = code.category();
        category >= &self.lo[..] && category <= &self.hi[..]
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            String::from_utf8_lossy(&self.lo),
            String::from_utf8_lossy(&self.hi)
        )
    }
}

fn category_bytes(s: &str) -> Result<[u8; 3]> {
    let code = Icd10Code::parse(s)?;
    ensure!(
        usize::from(code.len) == 3,
        "range bounds are 3-character categories, got \"{}\"",
        s
    );
    Ok([code.buf[0], code.buf[1], code.buf[2]])
}

/// A curated list of codes, matched by prefix (a listed category matches all its extensions).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CodeList {
    codes: Arc<BTreeSet<Icd10Code>>,
}

impl CodeList {
    fn new(codes: BTreeSet<Icd10Code>) -> Self {
        Self {
            codes: Arc::new(codes),
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> iter::Copied<btree_set::Iter<'_, Icd10Code>> {
        self.codes.iter().copied()
    }

    /// A version of `CodeList` that can prefix-match codes quickly.
    pub fn into_matcher(self) -> CodeListMatcher {
        CodeListMatcher::new(self)
    }
}

impl FromIterator<Icd10Code> for CodeList {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Icd10Code>,
    {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for CodeList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        let mut codes = self.codes.iter();
        if let Some(code) = codes.next() {
            write!(f, "{}", code)?;
        }
        for code in codes {
            write!(f, ", {}", code)?;
        }
        write!(f, "}}")
    }
}

/// A `CodeList` with a prebuilt automaton. Anchored, so a pattern only matches from the start
/// of the code: `a41` matches `a419` but not `ba41`.
pub struct CodeListMatcher {
    list: CodeList,
    matcher: AhoCorasick,
}

impl CodeListMatcher {
    fn new(list: CodeList) -> Self {
        let matcher = AhoCorasickBuilder::new()
            .anchored(true)
            .build(list.iter().map(|code| code.as_bytes().to_vec()));
        Self { list, matcher }
    }

    pub fn matches(&self, code: &Icd10Code) -> bool {
        self.matcher.is_match(code.as_bytes())
    }

    pub fn into_inner(self) -> CodeList {
        self.list
    }
}

impl ops::Deref for CodeListMatcher {
    type Target = CodeList;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl fmt::Debug for CodeListMatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CodeListMatcher")
            .field("list", &self.list)
            .finish()
    }
}

/// Categories a single diagnosis row can hit. Fold row results with `|=` to get the
/// per-hospitalization flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DxCategories {
    pub ischemic_heart: bool,
    pub cerebrovascular: bool,
    pub external_cause: bool,
    pub sepsis: bool,
    pub cancer: bool,
}

impl DxCategories {
    /// CALC qualifying cause: any of the three cause-of-death ranges.
    pub fn any_cause(&self) -> bool {
        self.ischemic_heart || self.cerebrovascular || self.external_cause
    }

    pub fn any_contraindication(&self) -> bool {
        self.sepsis || self.cancer
    }
}

impl ops::BitOrAssign for DxCategories {
    fn bitor_assign(&mut self, rhs: Self) {
        self.ischemic_heart |= rhs.ischemic_heart;
        self.cerebrovascular |= rhs.cerebrovascular;
        self.external_cause |= rhs.external_cause;
        self.sepsis |= rhs.sepsis;
        self.cancer |= rhs.cancer;
    }
}

/// Immutable lookup table mapping a normalized code to the categories it belongs to.
///
/// The cause ranges are the CMS CALC definition (I20–I25 ischemic heart, I60–I69
/// cerebrovascular, V01–Y89 external cause). The contraindication lists are injected so tests
/// can run against synthetic lists; production code uses [`DxClassifier::curated`].
pub struct DxClassifier {
    ischemic_heart: CodeRange,
    cerebrovascular: CodeRange,
    external_cause: CodeRange,
    sepsis: CodeListMatcher,
    cancer: CodeListMatcher,
}

impl DxClassifier {
    pub fn new(sepsis: CodeList, cancer: CodeList) -> Self {
        Self {
            ischemic_heart: CodeRange {
                lo: *b"i20",
                hi: *b"i25",
            },
            cerebrovascular: CodeRange {
                lo: *b"i60",
                hi: *b"i69",
            },
            external_cause: CodeRange {
                lo: *b"v01",
                hi: *b"y89",
            },
            sepsis: sepsis.into_matcher(),
            cancer: cancer.into_matcher(),
        }
    }

    /// The classifier built from the versioned lists in `data/`.
    pub fn curated() -> &'static DxClassifier {
        static CURATED: Lazy<DxClassifier> = Lazy::new(|| {
            let (sepsis, cancer) = load_contraindications(CONTRAINDICATIONS_CSV.as_bytes())
                .expect("embedded contraindication lists parse");
            DxClassifier::new(sepsis, cancer)
        });
        &CURATED
    }

    pub fn classify(&self, code: &Icd10Code) -> DxCategories {
        DxCategories {
            ischemic_heart: self.ischemic_heart.contains(code),
            cerebrovascular: self.cerebrovascular.contains(code),
            external_cause: self.external_cause.contains(code),
            sepsis: self.sepsis.matches(code),
            cancer: self.cancer.matches(code),
        }
    }
}

impl fmt::Debug for DxClassifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DxClassifier")
            .field("ischemic_heart", &self.ischemic_heart)
            .field("cerebrovascular", &self.cerebrovascular)
            .field("external_cause", &self.external_cause)
            .field("sepsis", &self.sepsis.len())
            .field("cancer", &self.cancer.len())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ContraindicationRow {
    category: String,
    code: Icd10Code,
}

/// Parse the two contraindication lists out of the versioned CSV (columns `category,code`).
pub fn load_contraindications(csv: &[u8]) -> Result<(CodeList, CodeList)> {
    let mut sepsis = BTreeSet::new();
    let mut cancer = BTreeSet::new();
    for row in csv::Reader::from_reader(csv).into_deserialize() {
        let row: ContraindicationRow = row.context("malformed contraindication list")?;
        match row.category.as_str() {
            "sepsis" => sepsis.insert(row.code),
            "cancer" => cancer.insert(row.code),
            other => bail!("unknown contraindication category \"{}\"", other),
        };
    }
    ensure!(
        !sepsis.is_empty() && !cancer.is_empty(),
        "contraindication list is missing a category"
    );
    Ok((CodeList::new(sepsis), CodeList::new(cancer)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> Icd10Code {
        Icd10Code::parse(s).unwrap()
    }

    #[test]
    fn normalization() {
        assert_eq!(code("I25.10").to_string(), "i2510");
        assert_eq!(code(" A41.9 ").to_string(), "a419");
        assert_eq!(code("T81.44XA").to_string(), "t8144xa");
        // dots are stripped wherever they sit, not just after the category
        assert_eq!(code("I25.10.99").to_string(), "i251099");
        assert!(Icd10Code::parse("I2").is_err());
        assert!(Icd10Code::parse("").is_err());
        assert!(Icd10Code::parse("I25.10.99X").is_err());
        assert!(Icd10Code::parse("I25-").is_err());
    }

    #[test]
    fn category_sorts_before_extensions() {
        let mut codes = vec![code("i26"), code("i2510"), code("i25")];
        codes.sort();
        assert_eq!(codes, vec![code("i25"), code("i2510"), code("i26")]);
    }

    #[test]
    fn cause_range_boundaries() {
        let ischemic = CodeRange::new("i20", "i25").unwrap();
        assert!(ischemic.contains(&code("i20")));
        assert!(ischemic.contains(&code("i214")));
        assert!(ischemic.contains(&code("i259")));
        assert!(!ischemic.contains(&code("i26")));
        assert!(!ischemic.contains(&code("i199")));

        let external = CodeRange::new("v01", "y89").unwrap();
        assert!(external.contains(&code("v011")));
        assert!(external.contains(&code("w19xxxa")));
        assert!(external.contains(&code("x99")));
        assert!(external.contains(&code("y899")));
        assert!(!external.contains(&code("y90")));
        assert!(!external.contains(&code("v00131")));
        assert!(!external.contains(&code("u071")));
    }

    #[test]
    fn list_matches_by_prefix() {
        let list: CodeList = ["a41", "r652", "t8144"]
            .into_iter()
            .map(code)
            .collect();
        let matcher = list.into_matcher();
        assert!(matcher.matches(&code("a41")));
        assert!(matcher.matches(&code("a419")));
        assert!(matcher.matches(&code("r6521")));
        assert!(matcher.matches(&code("t8144xa")));
        assert!(!matcher.matches(&code("a40")));
        // no unanchored substring hits
        assert!(!matcher.matches(&code("ba41")));
    }

    #[test]
    fn classify_synthetic_lists() {
        let sepsis: CodeList = [code("a41")].into_iter().collect();
        let cancer: CodeList = [code("c50")].into_iter().collect();
        let classifier = DxClassifier::new(sepsis, cancer);

        let hit = classifier.classify(&code("i619"));
        assert!(hit.cerebrovascular && hit.any_cause());
        assert!(!hit.any_contraindication());

        let hit = classifier.classify(&code("c509"));
        assert!(hit.cancer && hit.any_contraindication());
        assert!(!hit.any_cause());

        let mut folded = DxCategories::default();
        folded |= classifier.classify(&code("i219"));
        folded |= classifier.classify(&code("a419"));
        assert!(folded.ischemic_heart && folded.sepsis);
    }

    #[test]
    fn format_gate() {
        assert!(format_is_icd10("icd10"));
        assert!(format_is_icd10("icd10cm"));
        assert!(!format_is_icd10("icd9"));
        assert!(!format_is_icd10("snomed"));
    }

    #[test]
    fn curated_lists_load() {
        let (sepsis, cancer) =
            load_contraindications(CONTRAINDICATIONS_CSV.as_bytes()).unwrap();
        assert!(sepsis.len() > 5);
        assert!(cancer.len() > 50);

        let classifier = DxClassifier::curated();
        assert!(classifier.classify(&code("a4151")).sepsis);
        assert!(classifier.classify(&code("r6521")).sepsis);
        assert!(classifier.classify(&code("c3490")).cancer);
        assert!(classifier.classify(&code("d469")).cancer);
        // non-melanoma skin cancer deliberately not a contraindication
        assert!(!classifier.classify(&code("c4491")).cancer);
        // cause ranges are not contraindications
        let hit = classifier.classify(&code("i2510"));
        assert!(hit.ischemic_heart && !hit.any_contraindication());
    }
}
