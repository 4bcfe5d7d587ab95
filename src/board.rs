use eframe::egui;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

// Ids are derived from wall-clock millis plus a process-wide sequence
// number, so two boxes created in the same millisecond still differ.
fn next_raw_id() -> u64 {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    (millis << 20) | (seq & 0xf_ffff)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

#[derive(Clone, Debug)]
pub struct NoteBox {
    pub id: BoxId,
    pub content: String,
    pub pos: egui::Pos2,
    pub width: f32,
    pub z: u32,
}

// A highlighted region on a PDF page acting as a connection source.
// The rect is page-relative (PDF points, top-left origin), so it stays
// put under zoom and scroll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HighlightAnchor {
    pub page_index: usize,
    pub rect: egui::Rect,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Endpoint {
    Box(BoxId),
    Highlight(HighlightAnchor),
}

#[derive(Clone, Copy, Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: Endpoint,
    pub to: BoxId,
}

// What the user currently has selected, waiting for an "Explain" click.
// The enum makes the box-XOR-pdf rule structural.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub text: String,
    pub source: SelectionSource,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SelectionSource {
    BoxText { box_id: BoxId },
    Pdf { page_index: usize, rect: egui::Rect },
}

/// In-memory collection of note boxes and the directed connections
/// between them. All mutation goes through these operations.
#[derive(Default)]
pub struct Board {
    boxes: Vec<NoteBox>,
    connections: Vec<Connection>,
    next_z: u32,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxes(&self) -> &[NoteBox] {
        &self.boxes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn get(&self, id: BoxId) -> Option<&NoteBox> {
        self.boxes.iter().find(|b| b.id == id)
    }

    pub fn contains(&self, id: BoxId) -> bool {
        self.get(id).is_some()
    }

    /// Boxes in paint order, lowest z first.
    pub fn boxes_by_z(&self) -> Vec<NoteBox> {
        let mut sorted = self.boxes.clone();
        sorted.sort_by_key(|b| b.z);
        sorted
    }

    pub fn create_box(&mut self, content: impl Into<String>, pos: egui::Pos2, width: f32) -> BoxId {
        let id = BoxId(next_raw_id());
        self.next_z += 1;
        self.boxes.push(NoteBox {
            id,
            content: content.into(),
            pos,
            width,
            z: self.next_z,
        });
        id
    }

    pub fn set_content(&mut self, id: BoxId, content: impl Into<String>) {
        if let Some(b) = self.boxes.iter_mut().find(|b| b.id == id) {
            b.content = content.into();
        }
    }

    pub fn set_width(&mut self, id: BoxId, width: f32) {
        if let Some(b) = self.boxes.iter_mut().find(|b| b.id == id) {
            b.width = width;
        }
    }

    pub fn move_to(&mut self, id: BoxId, pos: egui::Pos2) {
        if let Some(b) = self.boxes.iter_mut().find(|b| b.id == id) {
            b.pos = pos;
        }
    }

    pub fn bring_to_front(&mut self, id: BoxId) {
        let top = self.next_z;
        if let Some(b) = self.boxes.iter_mut().find(|b| b.id == id) {
            if b.z < top {
                self.next_z += 1;
                b.z = self.next_z;
            }
        }
    }

    /// Adds a directed connection ending at `to`. Refuses to create a
    /// dangling edge if `to` no longer exists (the source box of a
    /// pending explanation may have been deleted in the meantime).
    pub fn connect(&mut self, from: Endpoint, to: BoxId) -> Option<ConnectionId> {
        if !self.contains(to) {
            log::warn!("refusing connection to missing box {to:?}");
            return None;
        }
        if let Endpoint::Box(source) = from {
            if !self.contains(source) {
                log::warn!("refusing connection from missing box {source:?}");
                return None;
            }
        }
        let id = ConnectionId(next_raw_id());
        self.connections.push(Connection { id, from, to });
        Some(id)
    }

    /// Removes `id`, every box transitively reachable over outgoing
    /// `from -> to` edges, and every connection touching a removed box.
    pub fn delete_cascade(&mut self, id: BoxId) {
        let mut doomed: HashSet<BoxId> = HashSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !doomed.insert(next) {
                continue; // visited guard, cycle-safe
            }
            for conn in &self.connections {
                if matches!(conn.from, Endpoint::Box(source) if source == next) {
                    stack.push(conn.to);
                }
            }
        }
        self.boxes.retain(|b| !doomed.contains(&b.id));
        self.connections.retain(|c| {
            if doomed.contains(&c.to) {
                return false;
            }
            match c.from {
                Endpoint::Box(source) => !doomed.contains(&source),
                Endpoint::Highlight(_) => true,
            }
        });
    }
}
