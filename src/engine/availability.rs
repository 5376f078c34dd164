use crate::model::*;

/// Free date ranges of a room inside `window`, given its restrictions.
/// Used by the staff calendar; the booking path only needs yes/no answers.
pub fn free_spans(window: &Stay, restrictions: &[RoomRestriction]) -> Vec<Stay> {
    let mut taken: Vec<Stay> = restrictions
        .iter()
        .filter(|r| r.stay.overlaps(window))
        .map(|r| Stay::new(r.stay.start.max(window.start), r.stay.end.min(window.end)))
        .collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_stays(&[*window], &taken)
}

/// Merge sorted overlapping/adjacent stays into disjoint stays.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.start <= last.end
        {
            last.end = last.end.max(stay.end);
            continue;
        }
        merged.push(stay);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_stays(base: &[Stay], to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Stay::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Stay::new(current_start, b.end));
        }
    }

    result
}
