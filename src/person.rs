//! Groups one frame's faces, bodies, hands and gestures into persons.

use serde::Serialize;

use crate::geometry::Rect;
use crate::result::{FrameResult, Gesture, GestureSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Hands {
    pub left: Option<usize>,
    pub right: Option<usize>,
}

/// Entity ids resolved against the [`FrameResult`] the person was joined from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: usize,
    pub face: usize,
    pub body: Option<usize>,
    pub hands: Hands,
    pub gestures: Vec<Gesture>,
    /// Union of every attached entity box, in pixels.
    pub rect: Rect,
    /// `rect` normalized to the frame.
    pub rect_raw: Rect,
}

fn horizontally_inside(x: f32, rect: &Rect) -> bool {
    x > rect.x && x < rect.right()
}

fn vertically_inside(y: f32, rect: &Rect) -> bool {
    y > rect.y && y < rect.bottom()
}

/// One person per face. A body is attached when it contains the face's
/// left edge horizontally and its bottom edge vertically; hands are then
/// assigned to the left by their right edge and to the right by their left
/// edge, each hand at most once.
pub fn join(frame: &FrameResult) -> Vec<Person> {
    let mut persons = Vec::with_capacity(frame.face.len());
    for (index, face) in frame.face.iter().enumerate() {
        let body = frame.body.iter().find(|b| {
            horizontally_inside(face.rect.x, &b.rect)
                && vertically_inside(face.rect.bottom(), &b.rect)
        });

        let mut hands = Hands::default();
        if let Some(body) = body {
            for hand in &frame.hand {
                if !vertically_inside(hand.rect.y, &body.rect)
                    && !vertically_inside(hand.rect.bottom(), &body.rect)
                {
                    continue;
                }
                if hands.left.is_none() && horizontally_inside(hand.rect.right(), &body.rect) {
                    hands.left = Some(hand.id);
                } else if hands.right.is_none() && horizontally_inside(hand.rect.x, &body.rect) {
                    hands.right = Some(hand.id);
                }
            }
        }

        let hand_ids = [hands.left, hands.right];
        let gestures = frame
            .gesture
            .iter()
            .filter(|g| match g.source {
                GestureSource::Face(id) | GestureSource::Iris(id) => id == face.id,
                GestureSource::Body(id) => body.is_some_and(|b| b.id == id),
                GestureSource::Hand(id) => hand_ids.contains(&Some(id)),
            })
            .cloned()
            .collect();

        let hand_rects = frame
            .hand
            .iter()
            .filter(|h| hand_ids.contains(&Some(h.id)))
            .map(|h| &h.rect);
        let rects = std::iter::once(&face.rect)
            .chain(body.map(|b| &b.rect))
            .chain(hand_rects);
        let rect = Rect::union(rects).unwrap_or(face.rect);
        let rect_raw = if frame.canvas.width > 0 && frame.canvas.height > 0 {
            rect.normalized(frame.canvas.width as f32, frame.canvas.height as f32)
        } else {
            Rect::default()
        };

        persons.push(Person {
            id: index,
            face: face.id,
            body: body.map(|b| b.id),
            hands,
            gestures,
            rect,
            rect_raw,
        });
    }
    tracing::trace!(persons = persons.len(), "joined persons");
    persons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{BodyResult, Canvas, FaceResult, HandResult};
    use std::collections::BTreeMap;

    fn face(id: usize, rect: Rect) -> FaceResult {
        FaceResult {
            id,
            score: 1.0,
            box_score: 1.0,
            face_score: 1.0,
            rect,
            rect_raw: rect.normalized(400.0, 400.0),
            mesh: Vec::new(),
            mesh_raw: Vec::new(),
            annotations: BTreeMap::new(),
            rotation: None,
            embedding: None,
        }
    }

    fn body(id: usize, rect: Rect) -> BodyResult {
        BodyResult {
            id,
            score: 1.0,
            rect,
            rect_raw: rect.normalized(400.0, 400.0),
            keypoints: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    fn hand(id: usize, rect: Rect) -> HandResult {
        HandResult {
            id,
            score: 1.0,
            box_score: 1.0,
            finger_score: 1.0,
            rect,
            rect_raw: rect.normalized(400.0, 400.0),
            keypoints: Vec::new(),
            annotations: BTreeMap::new(),
            fingers: Vec::new(),
        }
    }

    fn frame() -> FrameResult {
        FrameResult {
            canvas: Canvas {
                width: 400,
                height: 400,
            },
            face: vec![face(0, Rect::new(150.0, 50.0, 100.0, 100.0))],
            body: vec![body(0, Rect::new(100.0, 40.0, 200.0, 350.0))],
            ..FrameResult::default()
        }
    }

    #[test]
    fn test_face_inside_body_without_hands() {
        let persons = join(&frame());
        assert_eq!(persons.len(), 1);
        let person = &persons[0];
        assert_eq!(person.body, Some(0));
        assert_eq!(person.hands.left, None);
        assert_eq!(person.hands.right, None);
        assert_eq!(person.rect, Rect::new(100.0, 40.0, 200.0, 350.0));
        assert_eq!(person.rect_raw, Rect::new(0.25, 0.1, 0.5, 0.875));
    }

    #[test]
    fn test_face_without_body() {
        let mut frame = frame();
        frame.body[0].rect = Rect::new(300.0, 40.0, 80.0, 350.0);
        let persons = join(&frame);
        assert_eq!(persons[0].body, None);
        assert_eq!(persons[0].rect, frame.face[0].rect);
    }

    #[test]
    fn test_hands_and_gestures() {
        let mut frame = frame();
        frame.hand = vec![
            hand(0, Rect::new(60.0, 200.0, 60.0, 60.0)),
            hand(1, Rect::new(280.0, 200.0, 60.0, 60.0)),
            hand(2, Rect::new(10.0, 10.0, 20.0, 20.0)),
        ];
        frame.gesture = vec![
            Gesture::new(GestureSource::Face(0), "facing center"),
            Gesture::new(GestureSource::Hand(1), "index up"),
            Gesture::new(GestureSource::Hand(2), "thumb up"),
            Gesture::new(GestureSource::Body(7), "i give up"),
        ];
        let persons = join(&frame);
        let person = &persons[0];
        assert_eq!(person.hands, Hands { left: Some(0), right: Some(1) });
        let names: Vec<&str> = person.gestures.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["facing center", "index up"]);
        assert_eq!(person.rect, Rect::new(60.0, 40.0, 280.0, 350.0));
    }

    #[test]
    fn test_empty_frame() {
        assert!(join(&FrameResult::default()).is_empty());
    }
}
