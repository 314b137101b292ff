//! Live preview rendering: region, gates, tracks and reference points.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as PixelRect;

use crate::tracker::{CountedState, ObjectTracker, Rect, Track};

const REGION: Rgb<u8> = Rgb([0, 255, 0]);
const FAR_GATE: Rgb<u8> = Rgb([255, 0, 0]);
const NEAR_GATE: Rgb<u8> = Rgb([0, 0, 255]);
const MID_LINE: Rgb<u8> = Rgb([255, 255, 0]);
const REFERENCE: Rgb<u8> = Rgb([255, 0, 255]);

/// Box colour by counting state.
pub fn track_color(track: &Track) -> Rgb<u8> {
    match track.counted {
        CountedState::NotCounted => Rgb([0, 128, 255]),
        CountedState::Counted => Rgb([0, 200, 0]),
        CountedState::Nullified => Rgb([220, 0, 0]),
    }
}

/// Draw a rectangle outline, skipping boxes that fall outside the frame.
pub fn outline(frame: &mut RgbImage, bbox: &Rect, color: Rgb<u8>) {
    let (width, height) = frame.dimensions();
    if let Some((x1, y1, x2, y2)) = bbox.clamp_to(width, height) {
        let rect = PixelRect::at(x1 as i32, y1 as i32).of_size(x2 - x1, y2 - y1);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

/// Render an annotated copy of `frame`.
pub fn render(frame: &RgbImage, tracker: &ObjectTracker, tracks: &[Track]) -> RgbImage {
    let mut canvas = frame.clone();
    let region = tracker.config().region;

    match tracker.gates() {
        Some(gates) => {
            outline(&mut canvas, &region, REGION);
            let (x1, x2) = (region.x, region.right());
            draw_line_segment_mut(&mut canvas, (x1, gates.far), (x2, gates.far), FAR_GATE);
            draw_line_segment_mut(&mut canvas, (x1, gates.near), (x2, gates.near), NEAR_GATE);
        }
        None => {
            let mid = (canvas.width() as f32 * 0.5).floor();
            let bottom = canvas.height() as f32;
            draw_line_segment_mut(&mut canvas, (mid, 0.0), (mid, bottom), MID_LINE);
        }
    }

    for track in tracks {
        outline(&mut canvas, &track.bbox, track_color(track));
        let point = (track.reference.x as i32, track.reference.y as i32);
        draw_filled_circle_mut(&mut canvas, point, 4, REFERENCE);
    }

    canvas
}
