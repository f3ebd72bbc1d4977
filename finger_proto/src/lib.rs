tonic::include_proto!("finger_spelling");

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("finger_spelling");

/// Number of keypoints the hand-landmark model produces per hand.
pub const NUM_LANDMARKS: usize = 21;
