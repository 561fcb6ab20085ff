use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// COCO class names used by the stock YOLOv5 checkpoints
pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

pub fn coco_names() -> Vec<String> {
    COCO_NAMES.iter().map(|name| name.to_string()).collect()
}

/// Largest class id accepted from model metadata
const MAX_CLASS_ID: usize = 100_000;

/// Parse the `names` metadata written by the YOLOv5 ONNX exporter,
/// e.g. `{0: 'person', 1: 'bicycle'}`. Ids above [`MAX_CLASS_ID`] reject
/// the whole table.
pub fn parse_names_metadata(raw: &str) -> Option<Vec<String>> {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    let entry = ENTRY.get_or_init(|| {
        Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).expect("valid names regex")
    });

    let mut indexed: Vec<(usize, String)> = entry
        .captures_iter(raw)
        .filter_map(|caps| Some((caps[1].parse().ok()?, caps[2].to_string())))
        .collect();
    if indexed.is_empty() {
        return None;
    }
    if indexed.iter().any(|(id, _)| *id > MAX_CLASS_ID) {
        log::warn!("Ignoring class names metadata with ids above {}", MAX_CLASS_ID);
        return None;
    }
    indexed.sort_by_key(|(id, _)| *id);

    let len = indexed.last().map(|(id, _)| id + 1).unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|id| format!("class{id}")).collect();
    for (id, name) in indexed {
        names[id] = name;
    }
    Some(names)
}

/// Read a `<weights>.names` file next to the weights, one label per line
pub fn load_sidecar_names(weights: &Path) -> Option<Vec<String>> {
    let sidecar = weights.with_extension("names");
    let raw = std::fs::read_to_string(&sidecar).ok()?;
    let names: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        None
    } else {
        log::debug!("Loaded {} class names from {:?}", names.len(), sidecar);
        Some(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exporter_metadata() {
        let names = parse_names_metadata("{0: 'person', 1: 'bicycle', 2: \"traffic light\"}")
            .unwrap();
        assert_eq!(names, vec!["person", "bicycle", "traffic light"]);
    }

    #[test]
    fn fills_gaps_in_metadata() {
        let names = parse_names_metadata("{2: 'c', 0: 'a'}").unwrap();
        assert_eq!(names, vec!["a", "class1", "c"]);
    }

    #[test]
    fn rejects_huge_class_ids() {
        assert_eq!(parse_names_metadata("{100000000000000: 'x'}"), None);
        assert_eq!(parse_names_metadata("{0: 'a', 100001: 'b'}"), None);
        // Too large for usize at all
        assert_eq!(parse_names_metadata("{99999999999999999999999: 'x'}"), None);
        assert_eq!(parse_names_metadata("{100000: 'x'}").map(|n| n.len()), Some(100_001));
    }

    #[test]
    fn rejects_garbage_metadata() {
        assert_eq!(parse_names_metadata("not a dict"), None);
    }

    #[test]
    fn sidecar_names_are_read_line_by_line() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let weights = dir.path().join("custom.onnx");
        std::fs::write(dir.path().join("custom.names"), "helmet\n\nvest\n")?;

        assert_eq!(
            load_sidecar_names(&weights),
            Some(vec!["helmet".to_string(), "vest".to_string()])
        );
        Ok(())
    }
}
