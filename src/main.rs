use marginalia::MarginaliaApp;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

fn main() -> Result<(), eframe::Error> {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("no other logger is installed");

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_title("Marginalia"),
        ..Default::default()
    };
    eframe::run_native(
        "Marginalia",
        options,
        Box::new(|_cc| Ok(Box::new(MarginaliaApp::default()))),
    )
}
