use crate::board::{Board, BoxId, Endpoint, HighlightAnchor, NoteBox, Selection, SelectionSource};
use crate::explain::{Completion, Explainer};
use crate::layout;
use crate::pdf::{init_pdfium, PdfDoc};
use arboard::Clipboard;
use eframe::egui;
use pdfium_render::prelude::Pdfium;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const HANDLE_HEIGHT: f32 = 8.0;
const BOX_PADDING: f32 = 12.0;
const BOX_ROUNDING: f32 = 12.0;
const MIN_BOX_WIDTH: f32 = 160.0;
const MAX_BOX_WIDTH: f32 = 420.0;
const CONTENT_FONT: f32 = 14.0;

// Colors lifted from the two themes the boxes are styled with.
struct Palette {
    board_bg: egui::Color32,
    box_fill: egui::Color32,
    box_stroke: egui::Color32,
    handle: egui::Color32,
    text: egui::Color32,
    arrow: egui::Color32,
    highlight_fill: egui::Color32,
    highlight_stroke: egui::Color32,
    selection_band: egui::Color32,
}

fn palette(dark_mode: bool) -> Palette {
    if dark_mode {
        Palette {
            board_bg: egui::Color32::from_rgb(0x33, 0x33, 0x33),
            box_fill: egui::Color32::from_rgb(0x44, 0x44, 0x44),
            box_stroke: egui::Color32::from_rgb(0x55, 0x55, 0x55),
            handle: egui::Color32::from_rgb(0x66, 0x66, 0x66),
            text: egui::Color32::from_rgb(0xf9, 0xf9, 0xf9),
            arrow: egui::Color32::from_rgba_unmultiplied(0, 123, 255, 140),
            highlight_fill: egui::Color32::from_rgba_unmultiplied(255, 213, 79, 70),
            highlight_stroke: egui::Color32::from_rgb(255, 193, 7),
            selection_band: egui::Color32::from_rgba_unmultiplied(100, 150, 255, 40),
        }
    } else {
        Palette {
            board_bg: egui::Color32::from_rgb(0xf9, 0xf9, 0xf9),
            box_fill: egui::Color32::WHITE,
            box_stroke: egui::Color32::from_rgb(0xcc, 0xcc, 0xcc),
            handle: egui::Color32::from_rgb(0xdd, 0xdd, 0xdd),
            text: egui::Color32::from_rgb(0x33, 0x33, 0x33),
            arrow: egui::Color32::from_rgba_unmultiplied(0, 123, 255, 102),
            highlight_fill: egui::Color32::from_rgba_unmultiplied(255, 213, 79, 90),
            highlight_stroke: egui::Color32::from_rgb(255, 160, 0),
            selection_band: egui::Color32::from_rgba_unmultiplied(100, 150, 255, 30),
        }
    }
}

struct PageTexture {
    page: usize,
    width_px: u32,
    handle: egui::TextureHandle,
}

// Screen placement of the currently displayed page, refreshed every
// frame the PDF panel draws. Page points * scale + rect.min = screen.
#[derive(Clone, Copy)]
struct PageScreen {
    page: usize,
    rect: egui::Rect,
    scale: f32,
}

struct TextDrag {
    box_id: BoxId,
    start: egui::Pos2,
    current: egui::Pos2,
}

struct PdfDrag {
    start: egui::Pos2,
    current: egui::Pos2,
}

/// Decides where the explanation box goes, creates it and wires the
/// connection back to its source. `pdf_anchor_y` is the board-local
/// height of a PDF highlight, already mapped by the caller. Returns
/// None when the source box disappeared while the request was in
/// flight.
pub fn append_explanation(
    board: &mut Board,
    source: SelectionSource,
    reply: impl Into<String>,
    pdf_anchor_y: Option<f32>,
) -> Option<BoxId> {
    let (pos, from) = match source {
        SelectionSource::BoxText { box_id } => {
            let anchor = board.get(box_id)?.pos;
            (layout::next_free_slot(anchor, board.boxes()), Endpoint::Box(box_id))
        }
        SelectionSource::Pdf { page_index, rect } => {
            let y = pdf_anchor_y.unwrap_or(rect.min.y).max(0.0);
            (
                layout::slot_beside_row(y, board.boxes()),
                Endpoint::Highlight(HighlightAnchor { page_index, rect }),
            )
        }
    };
    let id = board.create_box(reply, pos, layout::BOX_WIDTH);
    board.connect(from, id);
    Some(id)
}

pub struct MarginaliaApp {
    board: Board,
    selection: Option<Selection>,
    explainer: Explainer,
    dark_mode: bool,
    notice: Option<String>,

    pdfium: Option<&'static Pdfium>,
    pdf: Option<PdfDoc>,
    page_index: usize,
    page_texture: Option<PageTexture>,
    page_screen: Option<PageScreen>,
    pdf_drag: Option<PdfDrag>,

    board_origin: egui::Pos2,
    editing: Option<BoxId>,
    edit_buffer: String,
    edit_focus_pending: bool,
    text_drag: Option<TextDrag>,
    clipboard: Option<Clipboard>,
    is_file_hovered: bool,
}

impl Default for MarginaliaApp {
    fn default() -> Self {
        let mut board = Board::new();
        board.create_box(
            "This is some sample text. Try selecting me!",
            egui::pos2(40.0, 100.0),
            layout::BOX_WIDTH,
        );
        Self {
            board,
            selection: None,
            explainer: Explainer::default(),
            dark_mode: false,
            notice: None,
            pdfium: None,
            pdf: None,
            page_index: 0,
            page_texture: None,
            page_screen: None,
            pdf_drag: None,
            board_origin: egui::Pos2::ZERO,
            editing: None,
            edit_buffer: String::new(),
            edit_focus_pending: false,
            text_drag: None,
            clipboard: Clipboard::new().ok(),
            is_file_hovered: false,
        }
    }
}

impl MarginaliaApp {
    fn open_pdf(&mut self, path: &Path) {
        let pdfium = match self.pdfium {
            Some(pdfium) => pdfium,
            None => match init_pdfium() {
                Ok(pdfium) => {
                    self.pdfium = Some(pdfium);
                    pdfium
                }
                Err(err) => {
                    log::error!("{err}");
                    self.notice = Some(err.to_string());
                    return;
                }
            },
        };
        // A failed load leaves boxes and connections untouched.
        match PdfDoc::open(pdfium, path) {
            Ok(doc) => {
                self.pdf = Some(doc);
                self.page_index = 0;
                self.page_texture = None;
                self.page_screen = None;
                self.pdf_drag = None;
                if let Some(Selection {
                    source: SelectionSource::Pdf { .. },
                    ..
                }) = self.selection
                {
                    self.selection = None;
                }
            }
            Err(err) => {
                log::error!("{err}");
                self.notice = Some(err.to_string());
            }
        }
    }

    fn pick_pdf(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("PDF Document", &["pdf"])
            .pick_file()
        {
            self.open_pdf(&path);
        }
    }

    // Board-local y for a highlight anchor, using the page placement of
    // the frame the completion arrived in. Falls back to the raw page
    // offset when that page is not on screen.
    fn highlight_board_y(&self, page_index: usize, rect: egui::Rect) -> f32 {
        match self.page_screen {
            Some(screen) if screen.page == page_index => {
                screen.rect.min.y + rect.min.y * screen.scale - self.board_origin.y
            }
            _ => rect.min.y,
        }
    }

    fn apply_completion(&mut self, done: Completion) {
        match done.result {
            Ok(reply) => {
                let pdf_anchor_y = match done.selection.source {
                    SelectionSource::Pdf { page_index, rect } => {
                        Some(self.highlight_board_y(page_index, rect))
                    }
                    SelectionSource::BoxText { .. } => None,
                };
                if append_explanation(&mut self.board, done.selection.source, reply, pdf_anchor_y)
                    .is_none()
                {
                    self.notice = Some("The box that asked for this explanation is gone.".into());
                }
            }
            Err(err) => {
                log::warn!("{err}");
                self.notice = Some(format!("Explanation failed: {err}"));
                // Put the snapshot back so the user can retry, unless a
                // newer selection took its place.
                if self.selection.is_none() {
                    self.selection = Some(done.selection);
                }
            }
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        self.is_file_hovered = false;
        let mut dropped = None;
        ctx.input(|i| {
            for file in &i.raw.hovered_files {
                if let Some(path) = &file.path {
                    if path.extension().is_some_and(|ext| ext == "pdf") {
                        self.is_file_hovered = true;
                        break;
                    }
                }
            }
            for file in &i.raw.dropped_files {
                if let Some(path) = &file.path {
                    if path.extension().is_some_and(|ext| ext == "pdf") {
                        dropped = Some(path.clone());
                    }
                }
            }
        });
        if let Some(path) = dropped {
            self.open_pdf(&path);
        }
    }

    fn top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Open PDF…").clicked() {
                self.pick_pdf();
            }

            if let Some(pdf) = &self.pdf {
                let pages = pdf.page_count();
                ui.separator();
                if ui
                    .add_enabled(self.page_index > 0, egui::Button::new("Previous"))
                    .clicked()
                {
                    self.page_index -= 1;
                }
                ui.label(format!("Page {} of {}", self.page_index + 1, pages));
                if ui
                    .add_enabled(self.page_index + 1 < pages, egui::Button::new("Next"))
                    .clicked()
                {
                    self.page_index += 1;
                }
            }

            ui.separator();
            let mode_label = if self.dark_mode { "Light mode" } else { "Dark mode" };
            if ui.button(mode_label).clicked() {
                self.dark_mode = !self.dark_mode;
            }

            ui.separator();
            match &self.selection {
                Some(selection) => {
                    let mut preview: String = selection.text.chars().take(40).collect();
                    if preview.len() < selection.text.len() {
                        preview.push('…');
                    }
                    ui.label(format!("“{preview}”"));
                    if ui.button("Explain").clicked() {
                        if let Some(selection) = self.selection.take() {
                            self.notice = None;
                            log::info!("requesting explanation for {} chars", selection.text.len());
                            self.explainer.request(selection);
                        }
                    }
                }
                None => {
                    ui.weak("Select text in the PDF or in a box");
                }
            }

            if self.explainer.in_flight() > 0 {
                ui.spinner();
            }
        });

        if let Some(notice) = self.notice.clone() {
            ui.horizontal(|ui| {
                ui.colored_label(egui::Color32::RED, notice);
                if ui.small_button("✕").clicked() {
                    self.notice = None;
                }
            });
        }
    }

    fn pdf_panel(&mut self, ui: &mut egui::Ui, colors: &Palette) {
        // Taken out of self for the duration of the frame, so the page
        // cache and selection can be updated while it is borrowed.
        let Some(pdf) = self.pdf.take() else {
            ui.centered_and_justified(|ui| {
                ui.weak("Open a PDF (or drop one here) to read alongside your notes.");
            });
            self.page_screen = None;
            return;
        };

        let Some(page) = pdf.page(self.page_index) else {
            self.page_screen = None;
            self.pdf = Some(pdf);
            return;
        };
        let page_size = page.size;

        egui::ScrollArea::vertical()
            .auto_shrink(false)
            .show(ui, |ui| {
                let avail = ui.available_width().max(50.0);
                let scale = avail / page_size.x;
                let display = egui::vec2(avail, page_size.y * scale);
                let (rect, response) =
                    ui.allocate_exact_size(display, egui::Sense::click_and_drag());
                let painter = ui.painter_at(rect);

                // Re-render only when the page or the panel width moved.
                let width_px = avail.round() as u32;
                let stale = self
                    .page_texture
                    .as_ref()
                    .map(|t| t.page != self.page_index || t.width_px.abs_diff(width_px) > 16)
                    .unwrap_or(true);
                if stale {
                    match pdf.render_page(self.page_index, width_px) {
                        Ok(image) => {
                            let handle = ui.ctx().load_texture(
                                "pdf-page",
                                image,
                                egui::TextureOptions::LINEAR,
                            );
                            self.page_texture = Some(PageTexture {
                                page: self.page_index,
                                width_px,
                                handle,
                            });
                        }
                        Err(err) => {
                            log::error!("{err}");
                            self.notice = Some(err.to_string());
                        }
                    }
                }
                if let Some(texture) = &self.page_texture {
                    painter.image(
                        texture.handle.id(),
                        rect,
                        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                        egui::Color32::WHITE,
                    );
                } else {
                    painter.rect_filled(rect, egui::Rounding::ZERO, egui::Color32::WHITE);
                }

                self.page_screen = Some(PageScreen {
                    page: self.page_index,
                    rect,
                    scale,
                });
                let to_screen = |r: egui::Rect| {
                    egui::Rect::from_min_max(
                        rect.min + r.min.to_vec2() * scale,
                        rect.min + r.max.to_vec2() * scale,
                    )
                };

                // Stored highlight anchors for this page.
                for conn in self.board.connections() {
                    if let Endpoint::Highlight(anchor) = conn.from {
                        if anchor.page_index == self.page_index {
                            let r = to_screen(anchor.rect);
                            painter.rect_filled(r, egui::Rounding::same(2.0), colors.highlight_fill);
                            painter.rect_stroke(
                                r,
                                egui::Rounding::same(2.0),
                                egui::Stroke::new(1.0, colors.highlight_stroke),
                            );
                        }
                    }
                }

                // The live selection, if it came from this page.
                if let Some(Selection {
                    source: SelectionSource::Pdf { page_index, rect: sel },
                    ..
                }) = self.selection
                {
                    if page_index == self.page_index {
                        painter.rect_filled(
                            to_screen(sel),
                            egui::Rounding::same(2.0),
                            colors.highlight_fill,
                        );
                    }
                }

                // Rubber-band text selection, suppressed while editing.
                if self.editing.is_none() {
                    if let Some(pos) = response.interact_pointer_pos() {
                        if response.drag_started() {
                            self.pdf_drag = Some(PdfDrag {
                                start: pos,
                                current: pos,
                            });
                        } else if response.dragged() {
                            if let Some(drag) = &mut self.pdf_drag {
                                drag.current = pos;
                            }
                        }
                    }
                    if let Some(drag) = &self.pdf_drag {
                        let band = egui::Rect::from_two_pos(drag.start, drag.current);
                        painter.rect_filled(band, egui::Rounding::ZERO, colors.selection_band);
                        painter.rect_stroke(
                            band,
                            egui::Rounding::ZERO,
                            egui::Stroke::new(1.0, colors.highlight_stroke),
                        );
                    }
                    if response.drag_stopped() {
                        if let Some(drag) = self.pdf_drag.take() {
                            let band = egui::Rect::from_two_pos(
                                ((drag.start - rect.min) / scale).to_pos2(),
                                ((drag.current - rect.min) / scale).to_pos2(),
                            );
                            match pdf.selection_in_rect(self.page_index, band) {
                                Some((text, bounds)) => {
                                    self.selection = Some(Selection {
                                        text,
                                        source: SelectionSource::Pdf {
                                            page_index: self.page_index,
                                            rect: bounds,
                                        },
                                    });
                                }
                                None => self.selection = None,
                            }
                        }
                    }
                    if response.clicked() {
                        self.selection = None;
                    }
                }
            });

        self.pdf = Some(pdf);
    }

    fn board_panel(&mut self, ui: &mut egui::Ui, colors: &Palette) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let origin = response.rect.min;
        self.board_origin = origin;
        painter.rect_filled(response.rect, egui::Rounding::ZERO, colors.board_bg);

        // A plain click on empty board space collapses the selection.
        if response.clicked() && self.editing.is_none() {
            self.selection = None;
        }

        let boxes = self.board.boxes_by_z();
        let font = egui::FontId::proportional(CONTENT_FONT);

        // Pre-pass: lay out every box so arrows can be drawn underneath.
        let mut galleys: HashMap<BoxId, Arc<egui::Galley>> = HashMap::new();
        let mut rects: HashMap<BoxId, egui::Rect> = HashMap::new();
        for b in &boxes {
            let galley = painter.layout(
                b.content.clone(),
                font.clone(),
                colors.text,
                b.width - 2.0 * BOX_PADDING,
            );
            let height = HANDLE_HEIGHT + 2.0 * BOX_PADDING + galley.size().y;
            let rect =
                egui::Rect::from_min_size(origin + b.pos.to_vec2(), egui::vec2(b.width, height));
            galleys.insert(b.id, galley);
            rects.insert(b.id, rect);
        }

        self.draw_connections(ui.ctx(), &painter, &rects, colors);

        for b in &boxes {
            self.show_box(ui, &painter, b, rects[&b.id], galleys[&b.id].clone(), colors);
        }

        if self.board.boxes().is_empty() {
            painter.text(
                response.rect.center(),
                egui::Align2::CENTER_CENTER,
                "Select text and click Explain to grow a tree of notes.",
                egui::FontId::proportional(18.0),
                egui::Color32::GRAY,
            );
        }
    }

    fn draw_connections(
        &self,
        ctx: &egui::Context,
        painter: &egui::Painter,
        rects: &HashMap<BoxId, egui::Rect>,
        colors: &Palette,
    ) {
        let stroke = egui::Stroke::new(3.0, colors.arrow);
        for conn in self.board.connections() {
            let Some(to_rect) = rects.get(&conn.to) else {
                continue;
            };
            let to = to_rect.left_center();
            match conn.from {
                Endpoint::Box(source) => {
                    if let Some(from_rect) = rects.get(&source) {
                        draw_arrow(painter, from_rect.right_center(), to, stroke);
                    }
                }
                Endpoint::Highlight(anchor) => {
                    // Crosses the panel boundary, so it gets its own layer
                    // and only shows while its page is on screen.
                    let Some(screen) = self.page_screen else { continue };
                    if screen.page != anchor.page_index {
                        continue;
                    }
                    let from = egui::pos2(
                        screen.rect.min.x + anchor.rect.max.x * screen.scale,
                        screen.rect.min.y + anchor.rect.center().y * screen.scale,
                    );
                    let overlay = ctx.layer_painter(egui::LayerId::new(
                        egui::Order::Middle,
                        egui::Id::new("connection-arrows"),
                    ));
                    draw_arrow(&overlay, from, to, stroke);
                }
            }
        }
    }

    fn show_box(
        &mut self,
        ui: &mut egui::Ui,
        painter: &egui::Painter,
        b: &NoteBox,
        rect: egui::Rect,
        galley: Arc<egui::Galley>,
        colors: &Palette,
    ) {
        let text_origin = rect.min + egui::vec2(BOX_PADDING, HANDLE_HEIGHT + BOX_PADDING);
        let text_rect = egui::Rect::from_min_size(text_origin, galley.size());

        // Frame, handle strip, then content.
        painter.rect_filled(rect, egui::Rounding::same(BOX_ROUNDING), colors.box_fill);
        painter.rect_stroke(
            rect,
            egui::Rounding::same(BOX_ROUNDING),
            egui::Stroke::new(2.0, colors.box_stroke),
        );
        let handle_rect = egui::Rect::from_min_size(
            rect.min,
            egui::vec2(rect.width(), HANDLE_HEIGHT + 4.0),
        );
        painter.rect_filled(
            handle_rect,
            egui::Rounding {
                nw: BOX_ROUNDING,
                ne: BOX_ROUNDING,
                sw: 0.0,
                se: 0.0,
            },
            colors.handle,
        );

        let editing_this = self.editing == Some(b.id);
        if !editing_this {
            painter.galley(text_origin, galley.clone(), colors.text);
        }

        // The whole frame drags the box; the text region on top of it
        // owns selection, editing and the context menu.
        let body_id = egui::Id::new(("note-box", b.id));
        let body = ui
            .interact(rect, body_id, egui::Sense::click_and_drag())
            .on_hover_cursor(egui::CursorIcon::Grab);
        let text_response = ui.interact(
            text_rect,
            egui::Id::new(("note-box-text", b.id)),
            egui::Sense::click_and_drag(),
        );

        if body.clicked() || body.drag_started() || text_response.clicked() {
            self.board.bring_to_front(b.id);
        }

        if body.dragged() && !editing_this {
            let pos = b.pos + body.drag_delta();
            self.board.move_to(b.id, pos);
        }

        if text_response.double_clicked() && self.editing.is_none() {
            self.start_edit(b.id, &b.content);
        }

        let mut context_action: Option<BoxMenuAction> = None;
        let mut menu = |ui: &mut egui::Ui| {
            if ui.button("Edit").clicked() {
                context_action = Some(BoxMenuAction::Edit);
                ui.close_menu();
            }
            if ui.button("Copy text").clicked() {
                context_action = Some(BoxMenuAction::Copy);
                ui.close_menu();
            }
            ui.separator();
            if ui.button("Delete").clicked() {
                context_action = Some(BoxMenuAction::Delete);
                ui.close_menu();
            }
        };
        body.clone().context_menu(&mut menu);
        text_response.clone().context_menu(&mut menu);
        match context_action {
            Some(BoxMenuAction::Edit) => self.start_edit(b.id, &b.content),
            Some(BoxMenuAction::Copy) => {
                if let Some(clipboard) = &mut self.clipboard {
                    if let Err(err) = clipboard.set_text(b.content.clone()) {
                        log::warn!("clipboard copy failed: {err}");
                    }
                }
            }
            Some(BoxMenuAction::Delete) => {
                self.board.delete_cascade(b.id);
                if let Some(Selection {
                    source: SelectionSource::BoxText { box_id },
                    ..
                }) = self.selection
                {
                    if !self.board.contains(box_id) {
                        self.selection = None;
                    }
                }
                return;
            }
            None => {}
        }

        if editing_this {
            self.show_editor(ui, b, text_origin);
            return;
        }

        // Drag across the text region to select part of the content.
        if self.editing.is_none() {
            if let Some(pos) = text_response.interact_pointer_pos() {
                if text_response.drag_started() {
                    self.text_drag = Some(TextDrag {
                        box_id: b.id,
                        start: pos,
                        current: pos,
                    });
                } else if text_response.dragged() {
                    if let Some(drag) = &mut self.text_drag {
                        drag.current = pos;
                    }
                }
            }
            if let Some(drag) = &self.text_drag {
                if drag.box_id == b.id {
                    let band = egui::Rect::from_two_pos(drag.start, drag.current);
                    painter.rect_filled(band, egui::Rounding::same(2.0), colors.selection_band);
                }
            }
            if text_response.drag_stopped() {
                if let Some(drag) = self.text_drag.take() {
                    let a = galley
                        .cursor_from_pos(drag.start - text_origin)
                        .ccursor
                        .index;
                    let z = galley
                        .cursor_from_pos(drag.current - text_origin)
                        .ccursor
                        .index;
                    let (lo, hi) = (a.min(z), a.max(z));
                    let text: String = b.content.chars().skip(lo).take(hi - lo).collect();
                    if text.trim().is_empty() {
                        self.selection = None;
                    } else {
                        self.selection = Some(Selection {
                            text,
                            source: SelectionSource::BoxText { box_id: b.id },
                        });
                    }
                }
            }
        }
    }

    fn start_edit(&mut self, id: BoxId, content: &str) {
        self.editing = Some(id);
        self.edit_buffer = content.to_string();
        self.edit_focus_pending = true;
    }

    fn show_editor(&mut self, ui: &mut egui::Ui, b: &NoteBox, text_origin: egui::Pos2) {
        let edit_id = egui::Id::new(("note-box-edit", b.id));
        let mut finished = ui.input(|i| i.key_pressed(egui::Key::Escape));

        egui::Area::new(egui::Id::new(("note-box-edit-area", b.id)))
            .fixed_pos(text_origin)
            .order(egui::Order::Foreground)
            .show(ui.ctx(), |ui| {
                let response = ui.add(
                    egui::TextEdit::multiline(&mut self.edit_buffer)
                        .id(edit_id)
                        .desired_width(b.width - 2.0 * BOX_PADDING)
                        .font(egui::TextStyle::Body),
                );
                if self.edit_focus_pending {
                    response.request_focus();
                    self.edit_focus_pending = false;
                }
                if response.changed() {
                    self.board.set_content(b.id, self.edit_buffer.clone());
                    // Re-fit the box to its content as the user types.
                    let widest = self
                        .edit_buffer
                        .lines()
                        .map(|line| {
                            ui.painter()
                                .layout_no_wrap(
                                    line.to_string(),
                                    egui::FontId::proportional(CONTENT_FONT),
                                    egui::Color32::WHITE,
                                )
                                .size()
                                .x
                        })
                        .fold(0.0, f32::max);
                    let width = (widest + 2.0 * BOX_PADDING).clamp(MIN_BOX_WIDTH, MAX_BOX_WIDTH);
                    self.board.set_width(b.id, width);
                }
                if response.lost_focus() {
                    finished = true;
                }
            });

        if finished {
            self.editing = None;
            self.edit_buffer.clear();
        }
    }

    fn drop_overlay(&self, ctx: &egui::Context) {
        if !self.is_file_hovered {
            return;
        }
        let painter = ctx.layer_painter(egui::LayerId::new(
            egui::Order::Foreground,
            egui::Id::new("pdf-drop-overlay"),
        ));
        let rect = ctx.screen_rect();
        painter.rect_filled(
            rect,
            egui::Rounding::ZERO,
            egui::Color32::from_rgba_unmultiplied(100, 150, 255, 60),
        );
        painter.text(
            rect.center(),
            egui::Align2::CENTER_CENTER,
            "Drop the PDF to open it",
            egui::FontId::proportional(24.0),
            egui::Color32::WHITE,
        );
        painter.rect_stroke(
            rect.shrink(5.0),
            egui::Rounding::same(10.0),
            egui::Stroke::new(3.0, egui::Color32::from_rgb(100, 150, 255)),
        );
    }
}

enum BoxMenuAction {
    Edit,
    Copy,
    Delete,
}

fn draw_arrow(painter: &egui::Painter, from: egui::Pos2, to: egui::Pos2, stroke: egui::Stroke) {
    painter.line_segment([from, to], stroke);
    let dir = to - from;
    if dir.length() < 1.0 {
        return;
    }
    let angle = dir.angle();
    let head = 10.0;
    for wing in [0.5, -0.5] {
        painter.line_segment([to, to - egui::Vec2::angled(angle + wing) * head], stroke);
    }
}

impl eframe::App for MarginaliaApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.set_visuals(if self.dark_mode {
            egui::Visuals::dark()
        } else {
            egui::Visuals::light()
        });
        let colors = palette(self.dark_mode);

        self.handle_dropped_files(ctx);

        while let Some(done) = self.explainer.poll() {
            self.apply_completion(done);
        }
        if self.explainer.in_flight() > 0 {
            // Keep polling while replies are outstanding, at a steady
            // cadence rather than redrawing flat out.
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        egui::TopBottomPanel::top("top-bar").show(ctx, |ui| {
            self.top_bar(ui);
        });

        let half = ctx.screen_rect().width() * 0.5;
        egui::SidePanel::left("pdf-panel")
            .resizable(true)
            .default_width(half)
            .show(ctx, |ui| {
                self.pdf_panel(ui, &colors);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.board_panel(ui, &colors);
        });

        self.drop_overlay(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{pos2, vec2, Rect};

    #[test]
    fn explaining_box_text_appends_one_box_and_one_connection() {
        let mut board = Board::new();
        let source = board.create_box("sample", pos2(100.0, 100.0), layout::BOX_WIDTH);

        let new_id = append_explanation(
            &mut board,
            SelectionSource::BoxText { box_id: source },
            "X",
            None,
        )
        .expect("source box exists");

        assert_eq!(board.boxes().len(), 2);
        assert_eq!(board.connections().len(), 1);
        let new_box = board.get(new_id).unwrap();
        assert_eq!(new_box.content, "X");
        assert_eq!(new_box.pos, pos2(100.0 + layout::GRID_STEP_X, 100.0));
        let conn = &board.connections()[0];
        assert_eq!(conn.from, Endpoint::Box(source));
        assert_eq!(conn.to, new_id);
    }

    #[test]
    fn explaining_a_pdf_selection_records_a_highlight_endpoint() {
        let mut board = Board::new();
        let rect = Rect::from_min_size(pos2(72.0, 200.0), vec2(120.0, 14.0));

        let new_id = append_explanation(
            &mut board,
            SelectionSource::Pdf {
                page_index: 3,
                rect,
            },
            "an explanation",
            Some(240.0),
        )
        .unwrap();

        assert_eq!(board.boxes().len(), 1);
        let b = board.get(new_id).unwrap();
        assert_eq!(b.pos, pos2(layout::LEFT_ORIGIN_X, 240.0));
        match board.connections()[0].from {
            Endpoint::Highlight(anchor) => {
                assert_eq!(anchor.page_index, 3);
                assert_eq!(anchor.rect, rect);
            }
            Endpoint::Box(_) => panic!("expected a highlight endpoint"),
        }
    }

    #[test]
    fn explanation_for_a_deleted_source_is_dropped() {
        let mut board = Board::new();
        let source = board.create_box("sample", pos2(0.0, 0.0), layout::BOX_WIDTH);
        board.delete_cascade(source);

        let result = append_explanation(
            &mut board,
            SelectionSource::BoxText { box_id: source },
            "orphan",
            None,
        );

        assert!(result.is_none());
        assert!(board.boxes().is_empty());
        assert!(board.connections().is_empty());
    }
}
