//! The notification sink: an external collaborator the core depends on
//! only through the `NotificationSink` trait, kept pluggable so tests
//! can observe emissions. `SmtpSink` is a minimal direct-SMTP client
//! standing in for the out-of-scope mail-transport client.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use log::warn;

use crate::error::NotifyError;

pub struct Notification {
    pub subject: String,
    pub body: String,
    pub html: bool,
}

pub trait NotificationSink {
    /// Best-effort: a failed send is logged by the caller and never
    /// interrupts the control loop.
    fn send(&self, recipients: &[String], notification: &Notification);
}

/// A minimal, synchronous SMTP client: connects, HELO, MAIL FROM,
/// RCPT TO per recipient, DATA. No TLS, no auth — sufficient for a
/// localhost relay, which is the default mail transport.
pub struct SmtpSink {
    pub host: String,
    pub from: String,
}

impl NotificationSink for SmtpSink {
    fn send(&self, recipients: &[String], notification: &Notification) {
        if recipients.is_empty() {
            return;
        }
        if let Err(err) = self.try_send(recipients, notification) {
            warn!("unable to deliver notification via {}: {err}", self.host);
        }
    }
}

impl SmtpSink {
    fn try_send(&self, recipients: &[String], notification: &Notification) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let mut stream = TcpStream::connect((self.host.as_str(), 25)).map_err(|source| self.connect_err(source))?;
        let mut reader = BufReader::new(stream.try_clone().map_err(|source| self.connect_err(source))?);

        self.expect_reply(&mut reader)?;
        self.command(&mut stream, &mut reader, "HELO metasys\r\n")?;
        self.command(&mut stream, &mut reader, &format!("MAIL FROM:<{}>\r\n", self.from))?;
        for rcpt in recipients {
            self.command(&mut stream, &mut reader, &format!("RCPT TO:<{rcpt}>\r\n"))?;
        }
        self.command(&mut stream, &mut reader, "DATA\r\n")?;

        let content_type = if notification.html {
            "text/html"
        } else {
            "text/plain"
        };
        let message = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: {content_type}\r\n\r\n{}\r\n.\r\n",
            self.from,
            recipients.join(", "),
            notification.subject,
            notification.body,
        );
        stream.write_all(message.as_bytes()).map_err(|source| self.connect_err(source))?;
        self.expect_reply(&mut reader)?;
        self.command(&mut stream, &mut reader, "QUIT\r\n")?;
        Ok(())
    }

    fn connect_err(&self, source: std::io::Error) -> NotifyError {
        NotifyError::Connect {
            host: self.host.clone(),
            source,
        }
    }

    fn command(
        &self,
        stream: &mut TcpStream,
        reader: &mut BufReader<TcpStream>,
        line: &str,
    ) -> Result<(), NotifyError> {
        stream.write_all(line.as_bytes()).map_err(|source| self.connect_err(source))?;
        self.expect_reply(reader)
    }

    /// SMTP replies starting with `2` or `3` are success/continue; anything
    /// else (e.g. a `550` from a relay that rejects the sender) is a
    /// rejection, not a transport failure.
    fn expect_reply(&self, reader: &mut BufReader<TcpStream>) -> Result<(), NotifyError> {
        let reply = read_reply(reader).map_err(|source| self.connect_err(source))?;
        match reply.as_bytes().first() {
            Some(b'2') | Some(b'3') => Ok(()),
            _ => Err(NotifyError::Rejected {
                host: self.host.clone(),
                reply: reply.trim_end().to_string(),
            }),
        }
    }
}

fn read_reply(reader: &mut BufReader<TcpStream>) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line)
}

/// Records every notification in memory instead of sending anything;
/// used in tests (and available to embedders).
#[derive(Default)]
pub struct RecordingSink {
    pub sent: std::sync::Mutex<Vec<(Vec<String>, String, String, bool)>>,
}

impl NotificationSink for RecordingSink {
    fn send(&self, recipients: &[String], notification: &Notification) {
        self.sent.lock().unwrap().push((
            recipients.to_vec(),
            notification.subject.clone(),
            notification.body.clone(),
            notification.html,
        ));
    }
}

/// Notifications are suppressed entirely when the recipient set is
/// empty; the loop still proceeds normally.
pub fn notify(sink: &dyn NotificationSink, recipients: &[String], notification: Notification) {
    if recipients.is_empty() {
        return;
    }
    sink.send(recipients, &notification);
}
