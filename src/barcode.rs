use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barcode<'a> {
    pub full: &'a str,
    pub analyte: Option<char>,
    pub plate: Option<&'a str>,
}

impl<'a> Barcode<'a> {
    pub fn parse(full: &'a str) -> Self {
        let tokens: Vec<&str> = full.split('-').collect();
        if tokens.len() < 7 {
            return Self {
                full,
                analyte: None,
                plate: None,
            };
        }
        Self {
            full,
            analyte: tokens[4].chars().last(),
            plate: Some(tokens[5]),
        }
    }
}

fn rna_rank(analyte: char) -> Option<u8> {
    match analyte {
        'H' => Some(3),
        'R' => Some(2),
        'T' => Some(1),
        _ => None,
    }
}

/// Orders two replicate barcodes; `Greater` means `a` is preferred.
pub fn compare_replicates(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let left = Barcode::parse(a);
    let right = Barcode::parse(b);
    let (Some(left_analyte), Some(right_analyte)) = (left.analyte, right.analyte) else {
        return a.cmp(b);
    };
    if left_analyte == right_analyte {
        return a.cmp(b);
    }
    if let (Some(left_rank), Some(right_rank)) = (rna_rank(left_analyte), rna_rank(right_analyte)) {
        return left_rank.cmp(&right_rank);
    }
    let whole_genome = |analyte: char| matches!(analyte, 'G' | 'W' | 'X');
    if left_analyte == 'D' && whole_genome(right_analyte) {
        return if right.plate > left.plate {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }
    if right_analyte == 'D' && whole_genome(left_analyte) {
        return if left.plate > right.plate {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    a.cmp(b)
}

/// Picks the preferred `(barcode, path)` candidate. Candidates are visited in
/// sorted order and barcode ties fall to the greater path, so the result
/// depends only on the candidate multiset.
pub fn choose_replicate<T: AsRef<str>>(candidates: &[(String, T)]) -> Option<&(String, T)> {
    let mut ordered: Vec<&(String, T)> = candidates.iter().collect();
    ordered.sort_by(|left, right| {
        left.0
            .cmp(&right.0)
            .then_with(|| left.1.as_ref().cmp(right.1.as_ref()))
    });
    ordered.into_iter().max_by(|left, right| {
        compare_replicates(&left.0, &right.0).then_with(|| left.1.as_ref().cmp(right.1.as_ref()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analyte_and_plate() {
        let barcode = Barcode::parse("TCGA-A6-5656-01A-21R-2338-13");
        assert_eq!(barcode.analyte, Some('R'));
        assert_eq!(barcode.plate, Some("2338"));
        assert_eq!(Barcode::parse("TCGA-A6-5656").analyte, None);
    }

    #[test]
    fn same_analyte_prefers_greater_barcode() {
        assert_eq!(
            compare_replicates("TCGA-A6-5656-01A-21R-2338-13", "TCGA-A6-5656-01A-22R-2338-13"),
            Ordering::Less
        );
    }

    #[test]
    fn dna_needs_higher_plate_to_beat_whole_genome() {
        assert_eq!(
            compare_replicates("TCGA-43-2581-01A-01D-0900-08", "TCGA-43-2581-01A-01W-0877-08"),
            Ordering::Greater
        );
        assert_eq!(
            compare_replicates("TCGA-43-2581-01A-01W-0877-08", "TCGA-43-2581-01A-01D-0000-08"),
            Ordering::Greater
        );
    }

    #[test]
    fn order_is_antisymmetric() {
        let barcodes = [
            "TCGA-A6-5656-01A-21R-2338-13",
            "TCGA-A6-5656-01A-21H-1838-13",
            "TCGA-A6-5656-01A-21T-1838-13",
            "TCGA-A6-5656-01A-21D-1838-13",
            "TCGA-A6-5656-01A-21G-1838-13",
            "TCGA-A6-5656-01A-21X-2000-13",
            "TCGA-A6-5656-01A",
        ];
        for a in barcodes {
            for b in barcodes {
                assert_eq!(compare_replicates(a, b), compare_replicates(b, a).reverse());
            }
        }
    }
}
