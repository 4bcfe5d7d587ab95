use crate::board::NoteBox;
use eframe::egui::{pos2, vec2, Pos2, Rect};

pub const BOX_WIDTH: f32 = 220.0;
pub const BOX_HEIGHT: f32 = 100.0;
pub const GRID_STEP_X: f32 = 250.0;
pub const GRID_STEP_Y: f32 = 120.0;
pub const LEFT_ORIGIN_X: f32 = 20.0;

// Margin added around every rect before overlap checks, so neighbouring
// boxes keep a visible gap. Must stay below (GRID_STEP_Y - BOX_HEIGHT) / 2,
// otherwise boxes in adjacent grid rows read as overlapping.
const SPACING: f32 = 8.0;
const ROW_GAP: f32 = 20.0;
const MAX_ATTEMPTS: u32 = 30;

fn inflated(b: &NoteBox) -> Rect {
    Rect::from_min_size(b.pos, vec2(b.width, BOX_HEIGHT)).expand(SPACING)
}

fn slot_is_free(pos: Pos2, boxes: &[NoteBox]) -> bool {
    let candidate = Rect::from_min_size(pos, vec2(BOX_WIDTH, BOX_HEIGHT)).expand(SPACING);
    boxes.iter().all(|b| !candidate.intersects(inflated(b)))
}

/// Greedy grid scan for a slot near `anchor`: one column right of the
/// anchor first, rightward up to two columns, then the next row down.
/// Past the attempt budget the box goes to the left origin one grid row
/// below the lowest existing box.
pub fn next_free_slot(anchor: Pos2, boxes: &[NoteBox]) -> Pos2 {
    for attempt in 1..=MAX_ATTEMPTS {
        let col = attempt % 3;
        let row = attempt / 3;
        let candidate = pos2(
            anchor.x + col as f32 * GRID_STEP_X,
            anchor.y + row as f32 * GRID_STEP_Y,
        );
        if slot_is_free(candidate, boxes) {
            return candidate;
        }
    }
    let lowest = boxes.iter().map(|b| b.pos.y).fold(f32::NEG_INFINITY, f32::max);
    if lowest.is_finite() {
        pos2(LEFT_ORIGIN_X, lowest + GRID_STEP_Y)
    } else {
        anchor
    }
}

/// Placement for a PDF-triggered box: stay at the anchor's height and
/// walk rightward past every box already sitting in that row. No
/// vertical grid slots are consulted here, only horizontal displacement.
pub fn slot_beside_row(y: f32, boxes: &[NoteBox]) -> Pos2 {
    let mut same_row: Vec<&NoteBox> = boxes
        .iter()
        .filter(|b| (b.pos.y - y).abs() < BOX_HEIGHT)
        .collect();
    same_row.sort_by(|a, b| a.pos.x.total_cmp(&b.pos.x));

    let mut x = LEFT_ORIGIN_X;
    for b in same_row {
        if b.pos.x > x + BOX_WIDTH {
            break; // a gap wide enough opened up
        }
        x = x.max(b.pos.x + b.width + ROW_GAP);
    }
    pos2(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;

    fn boxes_at(positions: &[(f32, f32)]) -> Vec<NoteBox> {
        let mut board = Board::new();
        for (i, (x, y)) in positions.iter().enumerate() {
            board.create_box(format!("box {i}"), pos2(*x, *y), BOX_WIDTH);
        }
        board.boxes().to_vec()
    }

    #[test]
    fn first_free_slot_is_one_column_right_of_the_anchor() {
        let boxes = boxes_at(&[(100.0, 100.0)]);
        let slot = next_free_slot(pos2(100.0, 100.0), &boxes);
        assert_eq!(slot, pos2(100.0 + GRID_STEP_X, 100.0));
    }

    #[test]
    fn occupied_column_pushes_the_slot_further_right() {
        let boxes = boxes_at(&[(100.0, 100.0), (100.0 + GRID_STEP_X, 100.0)]);
        let slot = next_free_slot(pos2(100.0, 100.0), &boxes);
        assert_eq!(slot, pos2(100.0 + 2.0 * GRID_STEP_X, 100.0));
    }

    #[test]
    fn full_row_wraps_to_the_next_row() {
        let boxes = boxes_at(&[
            (100.0, 100.0),
            (100.0 + GRID_STEP_X, 100.0),
            (100.0 + 2.0 * GRID_STEP_X, 100.0),
        ]);
        let slot = next_free_slot(pos2(100.0, 100.0), &boxes);
        assert_eq!(slot, pos2(100.0, 100.0 + GRID_STEP_Y));
    }

    #[test]
    fn returned_slot_never_overlaps_when_boxes_fit_the_budget() {
        // A dense cluster around the anchor, well under the attempt budget.
        let mut positions = Vec::new();
        for row in 0..3 {
            for col in 0..3 {
                positions.push((
                    100.0 + col as f32 * GRID_STEP_X + 15.0,
                    100.0 + row as f32 * GRID_STEP_Y - 7.0,
                ));
            }
        }
        let boxes = boxes_at(&positions);
        let slot = next_free_slot(pos2(100.0, 100.0), &boxes);
        let placed = Rect::from_min_size(slot, vec2(BOX_WIDTH, BOX_HEIGHT)).expand(SPACING);
        for b in &boxes {
            assert!(
                !placed.intersects(inflated(b)),
                "slot {slot:?} overlaps box at {:?}",
                b.pos
            );
        }
    }

    #[test]
    fn exhausted_budget_falls_back_below_the_lowest_box() {
        // Cover every scanned slot: 3 columns x 11 rows around the anchor.
        let mut positions = Vec::new();
        for row in 0..11 {
            for col in 0..3 {
                positions.push((
                    100.0 + col as f32 * GRID_STEP_X,
                    100.0 + row as f32 * GRID_STEP_Y,
                ));
            }
        }
        let boxes = boxes_at(&positions);
        let lowest = 100.0 + 10.0 * GRID_STEP_Y;
        let slot = next_free_slot(pos2(100.0, 100.0), &boxes);
        assert_eq!(slot, pos2(LEFT_ORIGIN_X, lowest + GRID_STEP_Y));
    }

    #[test]
    fn empty_board_keeps_the_anchor_row() {
        assert_eq!(slot_beside_row(240.0, &[]), pos2(LEFT_ORIGIN_X, 240.0));
    }

    #[test]
    fn row_conflicts_displace_rightward_only() {
        // Two boxes in the row, one far below that must not count.
        let boxes = boxes_at(&[
            (LEFT_ORIGIN_X, 250.0),
            (LEFT_ORIGIN_X + BOX_WIDTH + ROW_GAP, 230.0),
            (LEFT_ORIGIN_X, 250.0 + 3.0 * BOX_HEIGHT),
        ]);
        let slot = slot_beside_row(240.0, &boxes);
        assert_eq!(slot.y, 240.0);
        let expected_x = LEFT_ORIGIN_X + 2.0 * (BOX_WIDTH + ROW_GAP);
        assert_eq!(slot.x, expected_x);
    }

    #[test]
    fn wide_gap_in_the_row_is_taken() {
        let boxes = boxes_at(&[(LEFT_ORIGIN_X, 250.0), (900.0, 250.0)]);
        let slot = slot_beside_row(250.0, &boxes);
        assert_eq!(slot.x, LEFT_ORIGIN_X + BOX_WIDTH + ROW_GAP);
    }
}
