#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

use std::{
    path::PathBuf,
    sync::{Arc, mpsc},
    time::{Duration, Instant},
};

use arboard::Clipboard;
use clap::Parser;
use eframe::egui;
use tracing::{error, info, warn};
use ztui_client::{
    config::{self, ConfigOverrides},
    logging,
    transport::LocalConnector,
    window::{ConnectError, MainWindow, Notice, NoticeQueue, TickOutcome},
};
use ztui_core::{NetworkEntry, ReplyAggregator};

const APP_TITLE: &str = "ZeroTier One";
const WAITING_TEXT: &str = "Waiting for service...";

#[derive(Parser, Debug, Clone)]
#[command(name = "ztui", version, about = "Desktop monitor for the local ZeroTier One service")]
struct ClientArgs {
    /// Control port of the local service, host:port.
    #[arg(long)]
    service_addr: Option<String>,
    #[arg(long)]
    auth_token_file: Option<PathBuf>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Config file to read instead of the per-user default.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the effective settings back to the config file.
    #[arg(long, default_value_t = false)]
    save_config: bool,
}

struct ZtuiApp {
    window: MainWindow<LocalConnector>,
    poll_interval: Duration,
    next_poll: Instant,
    about_open: bool,
    notices: NoticeQueue,
}

impl ZtuiApp {
    fn new(window: MainWindow<LocalConnector>, poll_interval: Duration) -> Self {
        Self {
            window,
            poll_interval,
            next_poll: Instant::now(),
            about_open: false,
            notices: NoticeQueue::default(),
        }
    }

    fn poll_if_due(&mut self) {
        let now = Instant::now();
        if now < self.next_poll {
            return;
        }
        self.next_poll = now + self.poll_interval;

        match self.window.tick() {
            Ok(TickOutcome::Polled) => {}
            Ok(TickOutcome::ServiceUnresponsive) => {
                self.notices.push(Notice::unresponsive());
            }
            Err(err) => exit_with_error(&err),
        }
    }

    fn show_menu(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("Help", |ui| {
                    if ui.button("About").clicked() {
                        self.about_open = true;
                        ui.close_menu();
                    }
                });
            });
        });
    }

    fn show_main(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.add_enabled_ui(self.window.is_enabled(), |ui| {
                ui.horizontal(|ui| {
                    let text = self
                        .window
                        .status_line()
                        .unwrap_or_else(|| WAITING_TEXT.to_owned());
                    let button = egui::Button::new(egui::RichText::new(text).monospace());
                    if ui
                        .add(button)
                        .on_hover_text("Copy address to clipboard")
                        .clicked()
                    {
                        copy_to_clipboard(self.window.address());
                    }
                });
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_enabled_ui(self.window.is_enabled(), |ui| {
                self.show_join_row(ui);
                ui.separator();
                self.show_networks(ui);
            });
        });
    }

    fn show_join_row(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let mut text = self.window.network_id_input().to_owned();
            let response = ui.add(
                egui::TextEdit::singleline(&mut text)
                    .hint_text("Network ID")
                    .font(egui::TextStyle::Monospace)
                    .desired_width(180.0),
            );
            if response.changed() {
                self.window.set_network_id_input(&text);
            }

            let submitted =
                response.lost_focus() && ui.input(|input| input.key_pressed(egui::Key::Enter));
            if ui.button("Join Network").clicked() || submitted {
                if let Err(err) = self.window.join_network() {
                    info!("join rejected: {err}");
                    self.notices.push(Notice::invalid_network_id());
                }
            }
        });
    }

    fn show_networks(&self, ui: &mut egui::Ui) {
        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui| {
                if self.window.networks().is_empty() {
                    ui.weak("No networks joined.");
                    return;
                }
                for entry in self.window.networks().iter() {
                    ui.push_id(entry.handle(), |ui| network_row(ui, entry));
                    ui.separator();
                }
            });
    }

    fn show_about(&mut self, ctx: &egui::Context) {
        if !self.about_open {
            return;
        }

        egui::Window::new("About")
            .open(&mut self.about_open)
            .resizable(false)
            .collapsible(false)
            .show(ctx, |ui| {
                ui.heading(APP_TITLE);
                ui.label(format!("ztui {}", env!("CARGO_PKG_VERSION")));
                ui.label("Desktop monitor for the local ZeroTier One service.");
                let node = self.window.node();
                if !node.version.is_empty() {
                    ui.label(format!("Service version {}", node.version));
                }
            });
    }

    fn show_notice(&mut self, ctx: &egui::Context) {
        let Some(notice) = self.notices.current() else {
            return;
        };

        let mut open = true;
        let mut dismissed = false;
        egui::Window::new(notice.title)
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(&notice.message);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if !open || dismissed {
            self.notices.dismiss();
        }
    }
}

impl eframe::App for ZtuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.window.process_replies();
        self.poll_if_due();

        self.show_menu(ctx);
        self.show_main(ctx);
        self.show_about(ctx);
        self.show_notice(ctx);

        ctx.request_repaint_after(self.next_poll.saturating_duration_since(Instant::now()));
    }
}

fn network_row(ui: &mut egui::Ui, entry: &NetworkEntry) {
    ui.horizontal(|ui| {
        ui.monospace(entry.network_id());
        ui.strong(&entry.name);
    });
    egui::Grid::new("details").num_columns(2).show(ui, |ui| {
        ui.label("Status");
        ui.label(&entry.status)
            .on_hover_text(format!("Config age: {}", entry.config_age));
        ui.end_row();

        ui.label("Type");
        ui.label(&entry.network_type);
        ui.end_row();

        ui.label("Device");
        ui.monospace(&entry.device);
        ui.end_row();

        ui.label("Addresses");
        ui.vertical(|ui| {
            let ips = entry.ip_list();
            if ips.is_empty() {
                ui.weak("-");
            }
            for ip in ips {
                ui.monospace(ip);
            }
        });
        ui.end_row();
    });
}

fn copy_to_clipboard(text: &str) {
    let result = Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text.to_owned()));
    if let Err(err) = result {
        warn!("failed to copy address to clipboard: {err}");
    }
}

fn exit_with_error(err: &ConnectError) -> ! {
    error!("cannot connect to service: {err}");
    rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title(err.title())
        .set_description(err.user_message())
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
    std::process::exit(1);
}

fn main() {
    logging::init_logging();

    let args = match ClientArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            error!("arg parse failed: {err}");
            let _ = err.print();
            std::process::exit(2);
        }
    };

    let config_path = args.config.clone().unwrap_or_else(config::config_path);
    let saved = config::load_config(&config_path).merged(ConfigOverrides {
        service_addr: args.service_addr,
        auth_token_file: args.auth_token_file,
        poll_interval_ms: args.poll_interval_ms,
    });

    let settings = match config::resolve_settings(&saved) {
        Ok(settings) => settings,
        Err(err) => {
            error!("config resolution failed: {err}");
            rfd::MessageDialog::new()
                .set_level(rfd::MessageLevel::Error)
                .set_title(APP_TITLE)
                .set_description(format!("Failed to start:\n\n{err}"))
                .set_buttons(rfd::MessageButtons::Ok)
                .show();
            std::process::exit(2);
        }
    };

    if args.save_config {
        if let Err(err) = config::save_config_with_retry(&config_path, &saved) {
            warn!(path = %config_path.display(), "failed to save config: {err}");
        }
    }

    info!(
        service_addr = %settings.service_addr,
        auth_token_path = %settings.auth_token_path.display(),
        poll_interval_ms = settings.poll_interval.as_millis() as u64,
        "starting"
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(APP_TITLE)
            .with_inner_size([480.0, 420.0])
            .with_min_inner_size([360.0, 260.0]),
        ..Default::default()
    };

    let result = eframe::run_native(
        APP_TITLE,
        options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let (reply_tx, reply_rx) = mpsc::channel();
            // Runs on the transport thread; wake the UI so the batch is picked up promptly.
            let aggregator = Arc::new(ReplyAggregator::new(move |batch| {
                if reply_tx.send(batch).is_ok() {
                    ctx.request_repaint();
                }
            }));
            let connector = LocalConnector::new(
                settings.service_addr,
                settings.auth_token_path,
                aggregator,
            );
            let window = MainWindow::new(connector, reply_rx);
            Ok(Box::new(ZtuiApp::new(window, settings.poll_interval)))
        }),
    );

    if let Err(err) = result {
        error!("ui terminated with error: {err}");
        std::process::exit(1);
    }
}
