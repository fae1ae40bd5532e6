//! Processing mode catalog.
//!
//! Mode identifiers are opaque to the session controller; this catalog only
//! serves listing, labelling and sanity-checking user input.

/// One selectable mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// Identifier sent to the service.
    pub value: &'static str,
    /// Human-readable label.
    pub label: &'static str,
}

/// A named group of modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeGroup {
    /// Group heading.
    pub name: &'static str,
    /// Modes in display order.
    pub modes: &'static [Mode],
}

const fn mode(value: &'static str, label: &'static str) -> Mode {
    Mode { value, label }
}

// ============================================================================
// Catalog
// ============================================================================

/// Every group, in display order.
pub const CATALOG: &[ModeGroup] = &[
    ModeGroup {
        name: "Edge Detection",
        modes: &[
            mode("edge_detect_", "Edge Detection (Él detektálás)"),
            mode("grayscale_edge_detect_", "Grayscale Edge Detection (Szürke él detektálás)"),
            mode("optimal_edge_detect_", "Optimal Edge Detect"),
            mode("edge_enhance_", "Edge enhance"),
            mode("laplacian_edge_", "Laplacian Edge Detect"),
            mode("sobel_edge_detect_", "Sobel Edge Detection"),
            mode("log_edge_", "Laplacian of Gaussian Edge detection"),
        ],
    },
    ModeGroup {
        name: "Line Detection",
        modes: &[
            mode("diagonal_line_detect_", "Diagonal line detection"),
            mode("horizontal_line_detect_", "Horizontal Line Detect"),
            mode("vertical_line_detect_", "Vertical Line Detect"),
        ],
    },
    ModeGroup {
        name: "Image Processing",
        modes: &[
            mode("inversion_", "Inversion (Inverz)"),
            mode("noise_removal_", "Noise removal"),
            mode("sharpen_", "Sharpen"),
            mode("halftone_", "Halftone"),
            mode("diffusion_", "Diffusion"),
            mode("hexagonal_retinal_", "Hexagonal retinal processing 5x5 (mimic human vision)"),
            mode("binary_erosion_", "Binary erosion (Erózió)"),
            mode("binary_dilation_", "Binary dilation"),
        ],
    },
    ModeGroup {
        name: "Object Detection",
        modes: &[
            mode("circle_detect_", "Circle detection (Kör detektálás)"),
            mode("rectangle_detect_", "Rectangle detection (Négyzet detektálás)"),
            mode("corner_detect_", "Corner detection (Sarok detektálás)"),
            mode("blob_detect_", "Blob detect"),
            mode("texture_segment_", "Texture segmentation"),
        ],
    },
    ModeGroup {
        name: "Motion and Shadow",
        modes: &[
            mode("motion_detect_", "Motion detection"),
            mode("shadow_detect_", "Shadow Detection"),
        ],
    },
    ModeGroup {
        name: "Other",
        modes: &[
            mode("wave_template_", "Traveling Wave template (Hullámok modellezése)"),
            mode("connected_comp_", "Connected Components"),
            mode("saved_", "Saved"),
        ],
    },
];

fn find(value: &str) -> Option<(&'static ModeGroup, &'static Mode)> {
    CATALOG.iter().find_map(|group| {
        group
            .modes
            .iter()
            .find(|m| m.value == value)
            .map(|m| (group, m))
    })
}

/// Every mode identifier in display order.
pub fn all_values() -> Vec<&'static str> {
    CATALOG
        .iter()
        .flat_map(|group| group.modes.iter().map(|m| m.value))
        .collect()
}

/// Label for a mode identifier.
pub fn label(value: &str) -> Option<&'static str> {
    find(value).map(|(_, m)| m.label)
}

/// Group heading for a mode identifier.
pub fn group(value: &str) -> Option<&'static str> {
    find(value).map(|(g, _)| g.name)
}

/// Returns `true` if `value` is in the catalog.
pub fn is_known(value: &str) -> bool {
    find(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_values_are_unique() {
        let values = all_values();
        let unique: HashSet<_> = values.iter().collect();
        assert_eq!(values.len(), unique.len());
        assert_eq!(values.len(), 28);
        assert_eq!(values[0], "edge_detect_");
    }

    #[test]
    fn test_lookup() {
        assert_eq!(label("sharpen_"), Some("Sharpen"));
        assert_eq!(group("shadow_detect_"), Some("Motion and Shadow"));
        assert!(is_known("saved_"));
        assert!(!is_known("edge_detect"));
        assert_eq!(label("nope"), None);
    }

    #[test]
    fn test_default_mode_is_listed() {
        assert!(is_known(crate::constants::DEFAULT_MODE));
    }
}
