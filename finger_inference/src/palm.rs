use crate::config::PalmConfig;

/// Values per anchor in the regressor output: box center, box size and
/// seven palm keypoints.
pub const REGRESSOR_LEN: usize = 18;

const ANCHOR_STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;
const SCORE_CLIP: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
}

/// SSD anchors for a square input. Layers sharing a stride share a grid,
/// and their anchors are emitted together per cell.
pub fn generate_anchors(input_size: u32) -> Vec<Anchor> {
    let mut anchors = Vec::new();
    let mut layer = 0;

    while layer < ANCHOR_STRIDES.len() {
        let stride = ANCHOR_STRIDES[layer];
        let mut per_cell = 0;
        while layer < ANCHOR_STRIDES.len() && ANCHOR_STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let grid = input_size.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let anchor = Anchor {
                    x: (x as f32 + 0.5) / grid as f32,
                    y: (y as f32 + 0.5) / grid as f32,
                };
                anchors.extend(std::iter::repeat(anchor).take(per_cell));
            }
        }
    }

    anchors
}

/// Palm box normalized to the letterboxed square fed to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PalmDetection {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
}

impl PalmDetection {
    fn bounds(&self) -> (f32, f32, f32, f32) {
        (
            self.cx - self.w / 2.,
            self.cy - self.h / 2.,
            self.cx + self.w / 2.,
            self.cy + self.h / 2.,
        )
    }

    fn iou(&self, other: &PalmDetection) -> f32 {
        let (ax0, ay0, ax1, ay1) = self.bounds();
        let (bx0, by0, bx1, by1) = other.bounds();

        let inter_w = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
        let inter_h = (ay1.min(by1) - ay0.max(by0)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.w * self.h + other.w * other.h - inter;

        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Square hand crop around the palm in pixels of a letterboxed square
    /// of side `square_side`. The palm box is enlarged by `scale` and moved
    /// along y by `shift_y` box heights so the fingers fit.
    pub fn hand_region(&self, square_side: f32, scale: f32, shift_y: f32) -> HandRegion {
        let w = self.w * square_side;
        let h = self.h * square_side;
        let side = w.max(h) * scale;
        let cx = self.cx * square_side;
        let cy = self.cy * square_side + shift_y * h;

        HandRegion {
            x0: cx - side / 2.,
            y0: cy - side / 2.,
            side,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decodes raw detector outputs into at most `max_num_hands` palms,
/// strongest first.
pub fn decode_palms(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[Anchor],
    config: &PalmConfig,
) -> Vec<PalmDetection> {
    let size = config.input_size as f32;

    let candidates = anchors
        .iter()
        .zip(scores)
        .zip(regressors.chunks_exact(REGRESSOR_LEN))
        .filter_map(|((anchor, &raw), reg)| {
            let score = sigmoid(raw.clamp(-SCORE_CLIP, SCORE_CLIP));
            (score >= config.min_detection_confidence).then(|| PalmDetection {
                cx: anchor.x + reg[0] / size,
                cy: anchor.y + reg[1] / size,
                w: reg[2] / size,
                h: reg[3] / size,
                score,
            })
        })
        .collect();

    non_max_suppression(
        candidates,
        config.min_suppression_threshold,
        config.max_num_hands,
    )
}

fn non_max_suppression(
    mut candidates: Vec<PalmDetection>,
    threshold: f32,
    limit: usize,
) -> Vec<PalmDetection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<PalmDetection> = Vec::with_capacity(limit);
    for candidate in candidates {
        if kept.len() == limit {
            break;
        }
        if kept.iter().all(|k| k.iou(&candidate) <= threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Axis-aligned square crop, in letterboxed-square pixels. May extend past
/// the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandRegion {
    pub x0: f32,
    pub y0: f32,
    pub side: f32,
}

/// A frame centered in a black square of side `max(width, height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub width: u32,
    pub height: u32,
    pub side: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32) -> Self {
        let side = width.max(height);
        Self {
            width,
            height,
            side,
            pad_x: (side - width) / 2,
            pad_y: (side - height) / 2,
        }
    }

    /// Maps a point in square pixels to coordinates normalized to the frame.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.width as f32,
            (y - self.pad_y as f32) / self.height as f32,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ModelConfig;

    pub(crate) fn palm_config() -> PalmConfig {
        PalmConfig {
            model: ModelConfig {
                model_dir: "models".into(),
                onnx_file: "palm_detection.onnx".into(),
                num_instances: 1,
            },
            input_size: 192,
            min_detection_confidence: 0.5,
            min_suppression_threshold: 0.3,
            max_num_hands: 2,
            roi_scale: 2.6,
            roi_shift_y: -0.5,
            regressors_output: "Identity".into(),
            scores_output: "Identity_1".into(),
        }
    }

    /// Detector outputs with a confident palm of `size` px at each given
    /// anchor index. Every other anchor scores near zero.
    pub(crate) fn detector_outputs(
        anchor_count: usize,
        palms: &[(usize, f32)],
    ) -> (Vec<f32>, Vec<f32>) {
        let mut regressors = vec![0.0f32; anchor_count * REGRESSOR_LEN];
        let mut scores = vec![-10.0f32; anchor_count];
        for &(index, size) in palms {
            scores[index] = 5.0;
            regressors[index * REGRESSOR_LEN + 2] = size;
            regressors[index * REGRESSOR_LEN + 3] = size;
        }
        (regressors, scores)
    }

    #[test]
    fn test_anchor_layout() {
        let anchors = generate_anchors(192);

        // 24x24 cells with 2 anchors, then 12x12 cells with 6
        assert_eq!(anchors.len(), 2016);
        assert_eq!(anchors[0], Anchor { x: 0.5 / 24., y: 0.5 / 24. });
        assert_eq!(anchors[0], anchors[1]);
        assert_eq!(anchors[1152], Anchor { x: 0.5 / 12., y: 0.5 / 12. });
        assert_eq!(anchors[1157], anchors[1152]);
        assert_ne!(anchors[1158], anchors[1152]);
    }

    #[test]
    fn test_decode_two_palms() {
        let anchors = generate_anchors(192);
        // two cells on row 12 of the stride-8 grid
        let left = (12 * 24 + 4) * 2;
        let right = (12 * 24 + 19) * 2;
        let (regressors, scores) = detector_outputs(anchors.len(), &[(left, 30.0), (right, 30.0)]);

        let palms = decode_palms(&regressors, &scores, &anchors, &palm_config());

        assert_eq!(palms.len(), 2);
        let mut xs: Vec<f32> = palms.iter().map(|p| p.cx).collect();
        xs.sort_by(f32::total_cmp);
        assert!((xs[0] - anchors[left].x).abs() < 1e-6);
        assert!((xs[1] - anchors[right].x).abs() < 1e-6);
        assert!(palms.iter().all(|p| (p.w - 30.0 / 192.).abs() < 1e-6));
        assert!(palms.iter().all(|p| p.score > 0.99));
    }

    #[test]
    fn test_overlapping_palms_are_suppressed() {
        let anchors = generate_anchors(192);
        // both anchors of the same cell
        let (regressors, scores) = detector_outputs(anchors.len(), &[(600, 40.0), (601, 40.0)]);

        let palms = decode_palms(&regressors, &scores, &anchors, &palm_config());

        assert_eq!(palms.len(), 1);
    }

    #[test]
    fn test_palm_count_is_capped() {
        let anchors = generate_anchors(192);
        let spread: Vec<(usize, f32)> = [0, 20, 40, 300, 500]
            .iter()
            .map(|&cell| (cell * 2, 10.0))
            .collect();
        let (regressors, scores) = detector_outputs(anchors.len(), &spread);

        let mut config = palm_config();
        config.max_num_hands = 3;

        assert_eq!(decode_palms(&regressors, &scores, &anchors, &config).len(), 3);
    }

    #[test]
    fn test_hand_region_is_enlarged_and_shifted() {
        let palm = PalmDetection {
            cx: 0.5,
            cy: 0.5,
            w: 0.1,
            h: 0.1,
            score: 0.9,
        };

        let region = palm.hand_region(200.0, 2.0, -0.5);

        assert!((region.side - 40.0).abs() < 1e-4);
        assert!((region.x0 - 80.0).abs() < 1e-4);
        // center moved up by half the 20 px box
        assert!((region.y0 - 70.0).abs() < 1e-4);
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let letterbox = Letterbox::new(640, 480);

        assert_eq!(letterbox.side, 640);
        assert_eq!(letterbox.pad_y, 80);
        assert_eq!(letterbox.to_frame(320.0, 80.0), (0.5, 0.0));
        assert_eq!(letterbox.to_frame(0.0, 560.0), (0.0, 1.0));
    }
}
