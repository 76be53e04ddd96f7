//! Outbound intruder alerts: email through an HTTP mail relay and a Telegram
//! photo message. Each channel reports its own outcome.

use std::path::Path;
use std::time::Duration;

use chrono::Local;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use tracing::{info, warn};

use crate::config::{AlertsConfig, EmailConfig, TelegramConfig};
use crate::error::{GuardError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub email_ok: bool,
    pub chat_ok: bool,
}

impl DeliveryReport {
    pub fn any(&self) -> bool {
        self.email_ok || self.chat_ok
    }
}

pub trait Notifier: Send + Sync {
    /// A previously registered intruder was seen again.
    fn send_repeat_intruder_alert(&self, id: &str, image: &Path) -> DeliveryReport;
    /// The conversation escalated to the alarm.
    fn send_all_alerts(&self, id: &str, image: &Path, level: u8) -> DeliveryReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertKind {
    Escalation { level: u8 },
    Repeat,
}

pub struct AlertSystem {
    client: Client,
    email: Option<EmailConfig>,
    telegram: Option<TelegramConfig>,
    max_level: u8,
}

impl AlertSystem {
    pub fn new(config: &AlertsConfig, max_level: u8) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| GuardError::Notify(format!("http client: {}", e)))?;
        if config.email.is_some() {
            info!("\u{2705} email alerts enabled");
        }
        if config.telegram.is_some() {
            info!("\u{2705} Telegram alerts enabled");
        }
        if config.email.is_none() && config.telegram.is_none() {
            warn!("no alert channels configured, alerts will only be logged");
        }
        Ok(Self {
            client,
            email: config.email.clone(),
            telegram: config.telegram.clone(),
            max_level,
        })
    }

    fn subject(&self, id: &str, kind: AlertKind) -> String {
        match kind {
            AlertKind::Escalation { .. } => format!("\u{1f6a8} INTRUDER ALERT - {}", id),
            AlertKind::Repeat => format!("\u{1f6a8} REPEAT INTRUDER - {}", id),
        }
    }

    fn body(&self, id: &str, kind: AlertKind) -> String {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        match kind {
            AlertKind::Escalation { level } => format!(
                "\u{1f6a8} INTRUDER ALERT\n\nIntruder ID: {}\nTime: {}\nEscalation Level: {}/{}\nStatus: Siren activated\n\n\
                 An unknown person was detected in your room and refused to leave after multiple warnings.\n\
                 Photo of intruder is attached.",
                id, timestamp, level, self.max_level
            ),
            AlertKind::Repeat => format!(
                "\u{1f6a8} REPEAT INTRUDER ALERT\n\nWARNING: Previously warned!\n\nID: {}\nTime: {}\nStatus: Detected again\n\n\
                 This person was caught and warned before.",
                id, timestamp
            ),
        }
    }

    fn photo_part(image: &Path) -> Result<Part> {
        let bytes = std::fs::read(image)
            .map_err(|e| GuardError::Notify(format!("cannot read {}: {}", image.display(), e)))?;
        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "intruder.jpg".to_string());
        Part::bytes(bytes)
            .file_name(name)
            .mime_str("image/jpeg")
            .map_err(|e| GuardError::Notify(e.to_string()))
    }

    fn send_email(&self, cfg: &EmailConfig, id: &str, image: &Path, kind: AlertKind) -> Result<()> {
        info!(id, recipients = cfg.to.len(), "\u{1f4e7} sending email alert");
        let mut form = Form::new()
            .text("from", cfg.from.clone())
            .text("subject", self.subject(id, kind))
            .text("text", self.body(id, kind));
        for to in &cfg.to {
            form = form.text("to", to.clone());
        }
        // The mail still goes out without its attachment.
        match Self::photo_part(image) {
            Ok(part) => form = form.part("attachment", part),
            Err(e) => warn!("email without photo: {}", e),
        }

        let resp = self
            .client
            .post(&cfg.api_url)
            .basic_auth(&cfg.api_user, Some(&cfg.api_key))
            .multipart(form)
            .send()
            .map_err(|e| GuardError::Notify(format!("email: {}", e)))?;
        if !resp.status().is_success() {
            return Err(GuardError::Notify(format!("email relay returned {}", resp.status())));
        }
        Ok(())
    }

    fn send_telegram(&self, cfg: &TelegramConfig, id: &str, image: &Path, kind: AlertKind) -> Result<()> {
        info!(id, "\u{1f4f1} sending Telegram alert");
        let url = format!("{}/bot{}/sendPhoto", cfg.api_base.trim_end_matches('/'), cfg.bot_token);
        let form = Form::new()
            .text("chat_id", cfg.chat_id.clone())
            .text("caption", self.body(id, kind))
            .part("photo", Self::photo_part(image)?);

        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .map_err(|e| GuardError::Notify(format!("telegram: {}", e)))?;
        if !resp.status().is_success() {
            return Err(GuardError::Notify(format!("telegram returned {}", resp.status())));
        }
        Ok(())
    }

    fn dispatch(&self, id: &str, image: &Path, kind: AlertKind) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if let Some(cfg) = &self.email {
            match self.send_email(cfg, id, image, kind) {
                Ok(()) => report.email_ok = true,
                Err(e) => warn!("\u{274c} {}", e),
            }
        }
        if let Some(cfg) = &self.telegram {
            match self.send_telegram(cfg, id, image, kind) {
                Ok(()) => report.chat_ok = true,
                Err(e) => warn!("\u{274c} {}", e),
            }
        }
        info!(id, ?kind, email_ok = report.email_ok, chat_ok = report.chat_ok, "alert dispatch finished");
        report
    }
}

impl Notifier for AlertSystem {
    fn send_repeat_intruder_alert(&self, id: &str, image: &Path) -> DeliveryReport {
        self.dispatch(id, image, AlertKind::Repeat)
    }

    fn send_all_alerts(&self, id: &str, image: &Path, level: u8) -> DeliveryReport {
        self.dispatch(id, image, AlertKind::Escalation { level })
    }
}
