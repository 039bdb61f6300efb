//! Nearest-neighbour matching of detected faces against known encodings.

use crate::encodings::Encodings;
use presence_vision::{DetectedFace, Embedding};
use std::collections::BTreeSet;

/// Default acceptance threshold: Euclidean distance between L2-normalised
/// ArcFace embeddings, roughly cosine similarity 0.40.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.10;

/// One face in a frame matched to a staff id.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    /// Position of the face in detector order.
    pub face_index: usize,
    pub staff_id: i64,
    pub distance: f32,
}

/// Closest known staff id strictly under `threshold`, skipping `exclude`.
///
/// Candidates are visited in ascending id order and only a strictly smaller
/// distance replaces the current best, so equal distances resolve to the
/// lowest id.
pub fn nearest(
    embedding: &Embedding,
    known: &Encodings,
    threshold: f32,
    exclude: &BTreeSet<i64>,
) -> Option<(i64, f32)> {
    let mut best: Option<(i64, f32)> = None;
    for (staff_id, candidate) in known.iter() {
        if exclude.contains(&staff_id) {
            continue;
        }
        let distance = embedding.distance(candidate);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((staff_id, distance));
        }
    }
    best.filter(|&(_, d)| d < threshold)
}

/// Match every face of one frame, in detector order.
///
/// A staff id claimed by an earlier face is not offered to later faces of the
/// same frame.
pub fn match_frame(faces: &[DetectedFace], known: &Encodings, threshold: f32) -> Vec<FaceMatch> {
    let mut claimed = BTreeSet::new();
    let mut matches = Vec::new();

    for (face_index, face) in faces.iter().enumerate() {
        if let Some((staff_id, distance)) = nearest(&face.embedding, known, threshold, &claimed) {
            tracing::debug!(face_index, staff_id, distance, "face matched");
            claimed.insert(staff_id);
            matches.push(FaceMatch { face_index, staff_id, distance });
        } else {
            tracing::debug!(face_index, "face not recognised");
        }
    }
    matches
}

/// The frame match with the smallest distance, ties to the lowest staff id.
pub fn best_match(matches: &[FaceMatch]) -> Option<&FaceMatch> {
    matches.iter().min_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.staff_id.cmp(&b.staff_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{embedding, BLUE, GREEN, RED, THRESHOLD};
    use presence_vision::BoundingBox;

    fn face(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            location: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence: 0.9,
                landmarks: None,
            },
            embedding: Embedding::new(values),
        }
    }

    fn known() -> Encodings {
        [(1, embedding(RED)), (2, embedding(GREEN)), (3, embedding(BLUE))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_exact_match() {
        let matches = match_frame(&[face(vec![0.0, 1.0, 0.0])], &known(), THRESHOLD);
        assert_eq!(matches, vec![FaceMatch { face_index: 0, staff_id: 2, distance: 0.0 }]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let known: Encodings = [(7, Embedding::new(vec![0.0, 0.0]))].into_iter().collect();
        let exclude = BTreeSet::new();
        assert!(nearest(&Embedding::new(vec![0.5, 0.0]), &known, 0.5, &exclude).is_none());
        assert_eq!(nearest(&Embedding::new(vec![0.49, 0.0]), &known, 0.5, &exclude).map(|m| m.0), Some(7));
    }

    #[test]
    fn test_unknown_face_yields_nothing() {
        let stranger = face(vec![0.5, 0.5, 0.5]);
        assert!(match_frame(&[stranger], &known(), THRESHOLD).is_empty());
    }

    #[test]
    fn test_tie_resolves_to_lowest_id() {
        // Inserted out of order; both candidates are equidistant.
        let known: Encodings = [(9, Embedding::new(vec![1.0, 0.0])), (4, Embedding::new(vec![-1.0, 0.0]))]
            .into_iter()
            .collect();
        let matches = match_frame(&[face(vec![0.0, 0.0])], &known, 2.0);
        assert_eq!(matches[0].staff_id, 4);
    }

    #[test]
    fn test_staff_not_reused_within_frame() {
        let known: Encodings = [(1, Embedding::new(vec![0.0])), (2, Embedding::new(vec![0.3]))]
            .into_iter()
            .collect();
        let faces = [face(vec![0.0]), face(vec![0.05])];

        let matches = match_frame(&faces, &known, 0.5);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].staff_id, 1);
        assert_eq!(matches[1].staff_id, 2, "second face must fall through to the next candidate");
    }

    #[test]
    fn test_claimed_staff_leaves_later_face_unmatched() {
        let faces = [face(vec![1.0, 0.0, 0.0]), face(vec![1.0, 0.0, 0.0])];
        let matches = match_frame(&faces, &known(), THRESHOLD);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].face_index, 0);
    }

    #[test]
    fn test_best_match_prefers_smallest_distance() {
        let matches = vec![
            FaceMatch { face_index: 0, staff_id: 1, distance: 0.4 },
            FaceMatch { face_index: 1, staff_id: 5, distance: 0.1 },
            FaceMatch { face_index: 2, staff_id: 3, distance: 0.1 },
        ];
        let best = best_match(&matches).unwrap();
        assert_eq!(best.staff_id, 3);
        assert!(best_match(&[]).is_none());
    }

    #[test]
    fn test_empty_encodings_never_match() {
        assert!(match_frame(&[face(vec![1.0, 0.0, 0.0])], &Encodings::default(), THRESHOLD).is_empty());
    }
}
