//! `AnnotSet`: at most one annotation per kind, attached to every instruction
//! (spec §3). Decoders for the known kinds consume an [`SExp`] tree.

use crate::ir::sexp::SExp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotKind {
    Probability,
    CamlFrame,
    CxxLsda,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Annot {
    /// `Probability(n, d)`: branch is taken with probability n/d.
    Probability { num: u32, den: u32 },
    /// `CamlFrame(allocs[], infos[][])`: live roots at a potential GC point.
    CamlFrame { allocs: Vec<i64>, infos: Vec<Vec<i64>> },
    /// `CxxLSDA(cleanup, catchAll, catchTys[], filterTys[])`: landing-pad
    /// exception-table entry.
    CxxLsda { cleanup: bool, catch_all: bool, catch_types: Vec<String>, filter_types: Vec<String> },
}

impl Annot {
    pub fn kind(&self) -> AnnotKind {
        match self {
            Annot::Probability { .. } => AnnotKind::Probability,
            Annot::CamlFrame { .. } => AnnotKind::CamlFrame,
            Annot::CxxLsda { .. } => AnnotKind::CxxLsda,
        }
    }
}

/// Set semantics: insertion fails if a kind is already present (spec §3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotSet {
    entries: Vec<Annot>,
}

impl AnnotSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` (and leaves the set unchanged) if `kind()` is
    /// already present.
    pub fn insert(&mut self, annot: Annot) -> bool {
        if self.get(annot.kind()).is_some() {
            return false;
        }
        self.entries.push(annot);
        true
    }

    pub fn get(&self, kind: AnnotKind) -> Option<&Annot> {
        self.entries.iter().find(|a| a.kind() == kind)
    }

    pub fn remove(&mut self, kind: AnnotKind) -> Option<Annot> {
        let idx = self.entries.iter().position(|a| a.kind() == kind)?;
        Some(self.entries.remove(idx))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annot> {
        self.entries.iter()
    }

    /// Moves every annotation out of `self`, leaving it empty. Used when a
    /// pass replaces one call instruction with another and must carry the
    /// `AnnotSet` across (spec §4.5: "AnnotSets are moved from the old call
    /// to the new GC call").
    pub fn take(&mut self) -> AnnotSet {
        std::mem::take(self)
    }
}

pub fn decode_probability(exp: &SExp) -> Option<Annot> {
    if let SExp::List(items) = exp {
        if let [SExp::Number(n), SExp::Number(d)] = items.as_slice() {
            return Some(Annot::Probability { num: *n as u32, den: *d as u32 });
        }
    }
    None
}

fn decode_int_list(exp: &SExp) -> Option<Vec<i64>> {
    if let SExp::List(items) = exp {
        items.iter().map(|i| if let SExp::Number(n) = i { Some(*n) } else { None }).collect()
    } else {
        None
    }
}

pub fn decode_caml_frame(exp: &SExp) -> Option<Annot> {
    if let SExp::List(items) = exp {
        if let [allocs_exp, infos_exp] = items.as_slice() {
            let allocs = decode_int_list(allocs_exp)?;
            let infos = if let SExp::List(rows) = infos_exp {
                rows.iter().map(decode_int_list).collect::<Option<Vec<_>>>()?
            } else {
                return None;
            };
            return Some(Annot::CamlFrame { allocs, infos });
        }
    }
    None
}

fn decode_string_list(exp: &SExp) -> Option<Vec<String>> {
    if let SExp::List(items) = exp {
        items
            .iter()
            .map(|i| if let SExp::String(s) = i { Some(s.clone()) } else { None })
            .collect()
    } else {
        None
    }
}

pub fn decode_cxx_lsda(exp: &SExp) -> Option<Annot> {
    if let SExp::List(items) = exp {
        if let [SExp::Number(cleanup), SExp::Number(catch_all), catch_tys, filter_tys] = items.as_slice() {
            return Some(Annot::CxxLsda {
                cleanup: *cleanup != 0,
                catch_all: *catch_all != 0,
                catch_types: decode_string_list(catch_tys)?,
                filter_types: decode_string_list(filter_tys)?,
            });
        }
    }
    None
}

/// Dispatches on the annotation's name (the `@name` token) to the matching
/// decoder. An unrecognised name or malformed payload both yield `None`;
/// callers treat that as a parse error (spec §4.1's `MalformedAnnotation`).
pub fn decode_annot(name: &str, exp: &SExp) -> Option<Annot> {
    match name {
        "probability" => decode_probability(exp),
        "caml_frame" => decode_caml_frame(exp),
        "cxx_lsda" => decode_cxx_lsda(exp),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_per_kind() {
        let mut set = AnnotSet::new();
        assert!(set.insert(Annot::Probability { num: 1, den: 1 }));
        assert!(!set.insert(Annot::Probability { num: 1, den: 2 }));
        assert_eq!(set.get(AnnotKind::Probability), Some(&Annot::Probability { num: 1, den: 1 }));
    }

    #[test]
    fn decode_annot_dispatches_by_name() {
        let exp = crate::ir::sexp::parse("(1 2)").unwrap();
        assert_eq!(decode_annot("probability", &exp), Some(Annot::Probability { num: 1, den: 2 }));
        assert_eq!(decode_annot("unknown_kind", &exp), None);
    }

    #[test]
    fn decode_caml_frame_reads_allocs_and_infos() {
        let exp = crate::ir::sexp::parse("((1 2) ((3 4) (5)))").unwrap();
        assert_eq!(
            decode_caml_frame(&exp),
            Some(Annot::CamlFrame { allocs: vec![1, 2], infos: vec![vec![3, 4], vec![5]] })
        );
    }
}
