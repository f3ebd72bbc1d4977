use crate::{
    config::DrawingConfig,
    hand::{to_pixel, HAND_CONNECTIONS},
};
use finger_proto::Hand;
use opencv::{
    core::{Mat, Point, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

fn bgr(color: [u8; 3]) -> Scalar {
    Scalar::new(color[0] as f64, color[1] as f64, color[2] as f64, 0.0)
}

pub struct ImageConverter;

impl ImageConverter {
    pub fn encode_mat_to_jpg(mat: &Mat) -> Result<Vec<u8>, CvUtilsError> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", mat, &mut buf, &Vector::new())
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        Ok(buf.into())
    }

    /// Draws each hand's skeleton, then its landmarks on top.
    pub fn annotate_frame(
        frame: &mut Mat,
        hands: &[Hand],
        style: &DrawingConfig,
    ) -> Result<(), CvUtilsError> {
        let width = frame.cols();
        let height = frame.rows();
        let connection_color = bgr(style.connection_color);
        let landmark_color = bgr(style.landmark_color);

        for hand in hands {
            let points: Vec<Point> = hand
                .landmarks
                .iter()
                .map(|lm| {
                    let (cx, cy) = to_pixel(lm, width, height);
                    Point::new(cx, cy)
                })
                .collect();

            for (i, point) in points.iter().enumerate() {
                tracing::debug!("Landmark {} ({}): ({}, {})", i, hand.handedness, point.x, point.y);
            }

            for &(start, end) in HAND_CONNECTIONS.iter() {
                let (Some(&a), Some(&b)) = (points.get(start), points.get(end)) else {
                    continue;
                };
                imgproc::line(
                    &mut *frame,
                    a,
                    b,
                    connection_color,
                    style.connection_thickness,
                    imgproc::LINE_AA,
                    0,
                )?;
            }

            for &point in &points {
                imgproc::circle(
                    &mut *frame,
                    point,
                    style.landmark_radius,
                    landmark_color,
                    style.landmark_thickness,
                    imgproc::LINE_AA,
                    0,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finger_proto::{Landmark, NUM_LANDMARKS};
    use opencv::core::{sum_elems, Vec3b, CV_8UC3};

    fn total_intensity(frame: &Mat) -> f64 {
        sum_elems(frame).unwrap().0.iter().sum()
    }

    fn black_frame() -> Mat {
        Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn centered_hand() -> Hand {
        Hand {
            landmarks: (0..NUM_LANDMARKS)
                .map(|_| Landmark {
                    x: 0.5,
                    y: 0.5,
                    z: 0.0,
                })
                .collect(),
            score: 0.9,
            handedness: "Right".into(),
        }
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let jpg = ImageConverter::encode_mat_to_jpg(&black_frame()).unwrap();

        assert_eq!(&jpg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_annotate_draws_landmarks() {
        let mut frame = black_frame();
        let style = DrawingConfig::default();

        ImageConverter::annotate_frame(&mut frame, &[centered_hand()], &style).unwrap();

        assert!(total_intensity(&frame) > 0.0);
        let corner = frame.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!(corner.0, [0, 0, 0]);
    }

    #[test]
    fn test_annotate_without_hands_leaves_frame_untouched() {
        let mut frame = black_frame();

        ImageConverter::annotate_frame(&mut frame, &[], &DrawingConfig::default()).unwrap();

        assert_eq!(total_intensity(&frame), 0.0);
    }
}
