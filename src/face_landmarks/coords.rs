//! Named index groups of the 468/478 point face mesh.
//!
//! "Left" and "right" are the subject's: `leftEye*` is on the image right for
//! an unmirrored frame.

pub const MESH_POINTS: usize = 468;
pub const REFINED_MESH_POINTS: usize = 478;

pub const SILHOUETTE: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

pub const LIPS_UPPER_OUTER: &[usize] = &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291];
pub const LIPS_LOWER_OUTER: &[usize] = &[146, 91, 181, 84, 17, 314, 405, 321, 375, 291];
pub const LIPS_UPPER_INNER: &[usize] = &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308];
pub const LIPS_LOWER_INNER: &[usize] = &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308];

pub const RIGHT_EYE_UPPER0: &[usize] = &[246, 161, 160, 159, 158, 157, 173];
pub const RIGHT_EYE_LOWER0: &[usize] = &[33, 7, 163, 144, 145, 153, 154, 155, 133];
pub const RIGHT_EYE_UPPER1: &[usize] = &[247, 30, 29, 27, 28, 56, 190];
pub const RIGHT_EYE_LOWER1: &[usize] = &[130, 25, 110, 24, 23, 22, 26, 112, 243];
pub const RIGHT_EYE_UPPER2: &[usize] = &[113, 225, 224, 223, 222, 221, 189];
pub const RIGHT_EYE_LOWER2: &[usize] = &[226, 31, 228, 229, 230, 231, 232, 233, 244];
pub const RIGHT_EYE_LOWER3: &[usize] = &[143, 111, 117, 118, 119, 120, 121, 128, 245];
pub const RIGHT_EYEBROW_UPPER: &[usize] = &[156, 70, 63, 105, 66, 107, 55, 193];
pub const RIGHT_EYEBROW_LOWER: &[usize] = &[35, 124, 46, 53, 52, 65];
pub const RIGHT_EYE_IRIS: &[usize] = &[473, 474, 475, 476, 477];

pub const LEFT_EYE_UPPER0: &[usize] = &[466, 388, 387, 386, 385, 384, 398];
pub const LEFT_EYE_LOWER0: &[usize] = &[263, 249, 390, 373, 374, 380, 381, 382, 362];
pub const LEFT_EYE_UPPER1: &[usize] = &[467, 260, 259, 257, 258, 286, 414];
pub const LEFT_EYE_LOWER1: &[usize] = &[359, 255, 339, 254, 253, 252, 256, 341, 463];
pub const LEFT_EYE_UPPER2: &[usize] = &[342, 445, 444, 443, 442, 441, 413];
pub const LEFT_EYE_LOWER2: &[usize] = &[446, 261, 448, 449, 450, 451, 452, 453, 464];
pub const LEFT_EYE_LOWER3: &[usize] = &[372, 340, 346, 347, 348, 349, 350, 357, 465];
pub const LEFT_EYEBROW_UPPER: &[usize] = &[383, 300, 293, 334, 296, 336, 285, 417];
pub const LEFT_EYEBROW_LOWER: &[usize] = &[265, 353, 276, 283, 282, 295];
pub const LEFT_EYE_IRIS: &[usize] = &[468, 469, 470, 471, 472];

pub const MIDWAY_BETWEEN_EYES: &[usize] = &[168];
pub const NOSE_TIP: &[usize] = &[1];
pub const NOSE_BOTTOM: &[usize] = &[2];
pub const NOSE_RIGHT_CORNER: &[usize] = &[98];
pub const NOSE_LEFT_CORNER: &[usize] = &[327];
pub const RIGHT_CHEEK: &[usize] = &[205];
pub const LEFT_CHEEK: &[usize] = &[425];

pub const MESH_ANNOTATIONS: &[(&str, &[usize])] = &[
    ("silhouette", SILHOUETTE),
    ("lipsUpperOuter", LIPS_UPPER_OUTER),
    ("lipsLowerOuter", LIPS_LOWER_OUTER),
    ("lipsUpperInner", LIPS_UPPER_INNER),
    ("lipsLowerInner", LIPS_LOWER_INNER),
    ("rightEyeUpper0", RIGHT_EYE_UPPER0),
    ("rightEyeLower0", RIGHT_EYE_LOWER0),
    ("rightEyeUpper1", RIGHT_EYE_UPPER1),
    ("rightEyeLower1", RIGHT_EYE_LOWER1),
    ("rightEyeUpper2", RIGHT_EYE_UPPER2),
    ("rightEyeLower2", RIGHT_EYE_LOWER2),
    ("rightEyeLower3", RIGHT_EYE_LOWER3),
    ("rightEyebrowUpper", RIGHT_EYEBROW_UPPER),
    ("rightEyebrowLower", RIGHT_EYEBROW_LOWER),
    ("rightEyeIris", RIGHT_EYE_IRIS),
    ("leftEyeUpper0", LEFT_EYE_UPPER0),
    ("leftEyeLower0", LEFT_EYE_LOWER0),
    ("leftEyeUpper1", LEFT_EYE_UPPER1),
    ("leftEyeLower1", LEFT_EYE_LOWER1),
    ("leftEyeUpper2", LEFT_EYE_UPPER2),
    ("leftEyeLower2", LEFT_EYE_LOWER2),
    ("leftEyeLower3", LEFT_EYE_LOWER3),
    ("leftEyebrowUpper", LEFT_EYEBROW_UPPER),
    ("leftEyebrowLower", LEFT_EYEBROW_LOWER),
    ("leftEyeIris", LEFT_EYE_IRIS),
    ("midwayBetweenEyes", MIDWAY_BETWEEN_EYES),
    ("noseTip", NOSE_TIP),
    ("noseBottom", NOSE_BOTTOM),
    ("noseRightCorner", NOSE_RIGHT_CORNER),
    ("noseLeftCorner", NOSE_LEFT_CORNER),
    ("rightCheek", RIGHT_CHEEK),
    ("leftCheek", LEFT_CHEEK),
];

/// BlazeFace keypoints, used as annotations when no mesh ran.
pub const BLAZEFACE_ANNOTATIONS: &[(&str, &[usize])] = &[
    ("rightEye", &[0]),
    ("leftEye", &[1]),
    ("nose", &[2]),
    ("mouth", &[3]),
    ("rightEar", &[4]),
    ("leftEar", &[5]),
];

/// Upper lip center to the point between the eyes.
pub const MESH_SYMMETRY_LINE: [usize; 2] = [13, 168];

/// Eye contour groups shared by the mesh and the 76 point iris model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeContour {
    Upper0,
    Upper1,
    Upper2,
    Lower0,
    Lower1,
    Lower2,
    Lower3,
}

impl EyeContour {
    pub const ALL: [EyeContour; 7] = [
        EyeContour::Upper0,
        EyeContour::Upper1,
        EyeContour::Upper2,
        EyeContour::Lower0,
        EyeContour::Lower1,
        EyeContour::Lower2,
        EyeContour::Lower3,
    ];

    /// Positions of this contour in the iris model output.
    pub fn iris_indices(self) -> &'static [usize] {
        match self {
            EyeContour::Upper0 => &[9, 10, 11, 12, 13, 14, 15],
            EyeContour::Upper1 => &[25, 26, 27, 28, 29, 30, 31],
            EyeContour::Upper2 => &[41, 42, 43, 44, 45, 46, 47],
            EyeContour::Lower0 => &[0, 1, 2, 3, 4, 5, 6, 7, 8],
            EyeContour::Lower1 => &[16, 17, 18, 19, 20, 21, 22, 23, 24],
            EyeContour::Lower2 => &[32, 33, 34, 35, 36, 37, 38, 39, 40],
            EyeContour::Lower3 => &[54, 55, 56, 57, 58, 59, 60, 61, 62],
        }
    }

    /// Mesh indices of this contour for one eye.
    pub fn mesh_indices(self, eye: Eye) -> &'static [usize] {
        match (eye, self) {
            (Eye::Left, EyeContour::Upper0) => LEFT_EYE_UPPER0,
            (Eye::Left, EyeContour::Upper1) => LEFT_EYE_UPPER1,
            (Eye::Left, EyeContour::Upper2) => LEFT_EYE_UPPER2,
            (Eye::Left, EyeContour::Lower0) => LEFT_EYE_LOWER0,
            (Eye::Left, EyeContour::Lower1) => LEFT_EYE_LOWER1,
            (Eye::Left, EyeContour::Lower2) => LEFT_EYE_LOWER2,
            (Eye::Left, EyeContour::Lower3) => LEFT_EYE_LOWER3,
            (Eye::Right, EyeContour::Upper0) => RIGHT_EYE_UPPER0,
            (Eye::Right, EyeContour::Upper1) => RIGHT_EYE_UPPER1,
            (Eye::Right, EyeContour::Upper2) => RIGHT_EYE_UPPER2,
            (Eye::Right, EyeContour::Lower0) => RIGHT_EYE_LOWER0,
            (Eye::Right, EyeContour::Lower1) => RIGHT_EYE_LOWER1,
            (Eye::Right, EyeContour::Lower2) => RIGHT_EYE_LOWER2,
            (Eye::Right, EyeContour::Lower3) => RIGHT_EYE_LOWER3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Outer and inner corner: first and last `EyeLower0` points.
    pub fn bounds(self) -> [usize; 2] {
        let lower = EyeContour::Lower0.mesh_indices(self);
        [lower[0], lower[lower.len() - 1]]
    }
}
