use finger_proto::Landmark;

/// Landmark index pairs forming the hand skeleton: palm, then thumb to pinky.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (0, 5),
    (9, 13),
    (13, 17),
    (5, 9),
    (0, 17),
    (1, 2),
    (2, 3),
    (3, 4),
    (5, 6),
    (6, 7),
    (7, 8),
    (9, 10),
    (10, 11),
    (11, 12),
    (13, 14),
    (14, 15),
    (15, 16),
    (17, 18),
    (18, 19),
    (19, 20),
];

/// Maps a normalized landmark onto a `width` x `height` frame.
pub fn to_pixel(landmark: &Landmark, width: i32, height: i32) -> (i32, i32) {
    (
        (landmark.x * width as f32) as i32,
        (landmark.y * height as f32) as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use finger_proto::NUM_LANDMARKS;
    use std::collections::HashSet;

    #[test]
    fn test_connections_cover_every_landmark() {
        let touched: HashSet<usize> = HAND_CONNECTIONS
            .iter()
            .flat_map(|&(a, b)| [a, b])
            .collect();

        assert_eq!(touched.len(), NUM_LANDMARKS);
        assert!(touched.iter().all(|&i| i < NUM_LANDMARKS));
    }

    #[test]
    fn test_to_pixel_truncates() {
        let landmark = Landmark {
            x: 0.5,
            y: 0.999,
            z: 0.0,
        };

        assert_eq!(to_pixel(&landmark, 640, 480), (320, 479));
    }
}
