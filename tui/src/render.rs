//! Draws one frame from a [`CoreSnapshot`].

use std::time::Duration;

use conductor_backend_client::TaskRun;
use ratatui::Frame;
use ratatui::layout::Constraint;
use ratatui::layout::Layout;
use ratatui::layout::Rect;
use ratatui::style::Color;
use ratatui::style::Style;
use ratatui::style::Stylize;
use ratatui::text::Line;
use ratatui::text::Span;
use ratatui::widgets::Block;
use ratatui::widgets::Borders;
use ratatui::widgets::Paragraph;
use ratatui::widgets::Wrap;

use crate::composer::Composer;
use crate::coordinator::CoreSnapshot;
use crate::coordinator::HintView;
use crate::coordinator::NoticeKind;
use crate::slash_command::built_in_slash_commands;
use crate::streaming::Role;
use crate::streaming::StreamingMessage;

const SIDEBAR_WIDTH: u16 = 34;

pub(crate) fn render(frame: &mut Frame, snapshot: &CoreSnapshot<'_>, composer: &Composer) {
    let [body, input, status] = Layout::vertical([
        Constraint::Min(3),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(frame.area());
    let [conversation, sidebar] =
        Layout::horizontal([Constraint::Min(20), Constraint::Length(SIDEBAR_WIDTH)]).areas(body);

    render_conversation(frame, conversation, snapshot);
    render_sidebar(frame, sidebar, snapshot);
    render_composer(frame, input, snapshot, composer);
    frame.render_widget(Paragraph::new(status_line(snapshot, composer)), status);
}

fn render_conversation(frame: &mut Frame, area: Rect, snapshot: &CoreSnapshot<'_>) {
    let mut title = vec![Span::from(format!(" {} ", snapshot.target)).bold()];
    if !snapshot.streaming_elsewhere.is_empty() {
        let others: Vec<String> = snapshot
            .streaming_elsewhere
            .iter()
            .map(ToString::to_string)
            .collect();
        title.push(format!("(also streaming: {}) ", others.join(", ")).dim());
    }
    let block = Block::default().borders(Borders::ALL).title(Line::from(title));
    let inner = block.inner(area);

    let lines: Vec<Line<'static>> = snapshot.messages.iter().flat_map(message_lines).collect();
    let height = wrapped_height(&lines, inner.width);
    let scroll = height.saturating_sub(inner.height as usize);
    let scroll = u16::try_from(scroll).unwrap_or(u16::MAX);

    frame.render_widget(
        Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0)),
        area,
    );
}

fn message_lines(message: &StreamingMessage) -> Vec<Line<'static>> {
    let mut header = match message.role {
        Role::User => vec![Span::from("you").cyan().bold()],
        Role::Agent => vec![Span::from("agent").magenta().bold()],
    };
    if let Some(agent) = &message.routed_to {
        header.push(format!(" → @{agent}").dim());
    }
    header.push(format!("  {}", message.created_at.format("%H:%M")).dim());

    let mut lines = vec![Line::from(header)];
    let mut body: Vec<Line<'static>> = message
        .content
        .split('\n')
        .map(|l| Line::from(l.to_string()))
        .collect();
    if message.is_streaming {
        match body.last_mut() {
            Some(last) => last.push_span("▌".dim()),
            None => body.push(Line::from("▌".dim())),
        }
    }
    lines.extend(body);
    lines.push(Line::default());
    lines
}

fn wrapped_height(lines: &[Line<'_>], width: u16) -> usize {
    let width = usize::from(width.max(1));
    lines
        .iter()
        .map(|line| line.width().div_ceil(width).max(1))
        .sum()
}

fn render_sidebar(frame: &mut Frame, area: Rect, snapshot: &CoreSnapshot<'_>) {
    let counts = snapshot.counts;
    let mut title = vec![Span::from(" Runs ").bold()];
    if snapshot.polling {
        title.push("⟳ ".dim());
    }
    let block = Block::default().borders(Borders::ALL).title(Line::from(title));

    let mut lines = vec![
        Line::from(vec![
            format!("● {} running", counts.running).yellow(),
            "  ".into(),
            format!("! {} new", counts.attention).light_red().bold(),
        ]),
        Line::from(vec![
            format!("✓ {} done", counts.completed).green(),
            "  ".into(),
            format!("✗ {} failed", counts.failed).red(),
        ]),
    ];

    let sections: [(&str, &[TaskRun], Color); 4] = [
        ("Running", &snapshot.buckets.running, Color::Yellow),
        ("Needs attention (/ack)", &snapshot.buckets.attention, Color::LightRed),
        ("Completed", &snapshot.buckets.completed, Color::Green),
        ("Failed", &snapshot.buckets.failed, Color::Red),
    ];
    for (heading, runs, color) in sections {
        if runs.is_empty() {
            continue;
        }
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(heading, Style::default().fg(color).bold())));
        for run in runs {
            lines.push(Line::from(vec![
                Span::from(format!(" {}", run.workflow_name)),
                format!(" {}", run.id).dim(),
            ]));
        }
    }

    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: true }),
        area,
    );
}

fn render_composer(frame: &mut Frame, area: Rect, snapshot: &CoreSnapshot<'_>, composer: &Composer) {
    let title = if snapshot.is_streaming {
        format!(" → {} (streaming, Ctrl+C to stop) ", snapshot.target)
    } else {
        format!(" → {} ", snapshot.target)
    };
    let block = Block::default().borders(Borders::ALL).title(title.dim());
    let inner = block.inner(area);

    let cursor = composer.cursor_column();
    let visible = usize::from(inner.width.max(1)).saturating_sub(1);
    let offset = cursor.saturating_sub(visible);
    let text = if composer.is_empty() {
        Line::from("Send a message, or /run <workflow>".dim())
    } else {
        Line::from(composer.text().to_string())
    };
    frame.render_widget(
        Paragraph::new(text)
            .block(block)
            .scroll((0, u16::try_from(offset).unwrap_or(u16::MAX))),
        area,
    );
    let x = inner.x + u16::try_from(cursor - offset).unwrap_or(0);
    frame.set_cursor_position((x, inner.y));
}

fn status_line(snapshot: &CoreSnapshot<'_>, composer: &Composer) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();

    if snapshot.reauth_required {
        spans.push(" Session expired: /login or Ctrl+A ".black().on_red());
        spans.push(" ".into());
    }
    for action in &snapshot.confirmations {
        spans.push(format!(" {} ", action.prompt()).black().on_yellow());
        spans.push(" ".into());
    }
    if let Some(notice) = snapshot.notice {
        let span = match notice.kind {
            NoticeKind::Info => Span::from(notice.text.clone()),
            NoticeKind::Error => Span::from(notice.text.clone()).red(),
            NoticeKind::Auth => Span::from(notice.text.clone()).light_red().bold(),
        };
        spans.push(span);
        spans.push("  ".into());
    } else if let Some(prefix) = composer.text().strip_prefix('/') {
        spans.extend(command_hints(prefix));
    }
    if let Some(hint) = &snapshot.hint {
        spans.push(hint_span(hint));
    }

    if spans.is_empty() {
        spans.push("Enter send · /run start · Ctrl+X cancel · Ctrl+R refresh · Ctrl+D quit".dim());
    }
    Line::from(spans)
}

fn command_hints(prefix: &str) -> Vec<Span<'static>> {
    let name = prefix.split_whitespace().next().unwrap_or("");
    built_in_slash_commands()
        .into_iter()
        .filter(|(command, _)| command.starts_with(name))
        .flat_map(|(command, cmd)| {
            [
                format!("/{command}").cyan(),
                format!(" {}  ", cmd.description()).dim(),
            ]
        })
        .collect()
}

fn hint_span(hint: &HintView) -> Span<'static> {
    if hint.cancel_requested {
        return format!("cancelling {} ({})…", hint.workflow_name, hint.run_id).dim();
    }
    format!(
        "Ctrl+X cancels {} ({}) · {}",
        hint.workflow_name,
        hint.run_id,
        format_remaining(hint.remaining)
    )
    .yellow()
}

fn format_remaining(remaining: Duration) -> String {
    // Round up so the countdown never shows 0s while still armed.
    let secs = remaining.as_millis().div_ceil(1000);
    format!("{secs}s")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use crate::app_event::AppEvent;
    use crate::app_event::RefreshOrigin;
    use crate::app_event::UserAction;
    use crate::coordinator::Coordinator;
    use crate::coordinator::CoreSettings;
    use chrono::Utc;
    use conductor_backend_client::ChatTarget;
    use conductor_backend_client::RunStatus;
    use conductor_backend_client::StreamEvent;
    use conductor_backend_client::TriggeredRun;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use ratatui::buffer::Buffer;
    use std::time::Instant;

    fn buffer_to_string(buffer: &Buffer) -> String {
        (0..buffer.area.height)
            .map(|row| {
                let mut line = String::new();
                for col in 0..buffer.area.width {
                    let symbol = buffer[(buffer.area.x + col, buffer.area.y + row)].symbol();
                    if symbol.is_empty() {
                        line.push(' ');
                    } else {
                        line.push_str(symbol);
                    }
                }
                line.trim_end().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn draw(coordinator: &Coordinator, composer: &Composer, now: Instant) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).expect("terminal");
        terminal
            .draw(|frame| render(frame, &coordinator.snapshot(now), composer))
            .expect("draw");
        buffer_to_string(terminal.backend().buffer())
    }

    #[test]
    fn renders_conversation_runs_and_hint() {
        let mut c = Coordinator::new(CoreSettings::default(), ChatTarget::Main);
        let t0 = Instant::now();
        c.handle(
            AppEvent::Action(UserAction::SubmitPrompt("status?".to_string())),
            t0,
        );
        c.handle(
            AppEvent::Chat {
                target: ChatTarget::Main,
                generation: 1,
                item: Ok(StreamEvent::Chunk {
                    text: "All green".to_string(),
                }),
            },
            t0,
        );
        c.handle(
            AppEvent::RunsRefreshed {
                origin: RefreshOrigin::Manual,
                seq: 1,
                result: Ok(vec![conductor_backend_client::TaskRun {
                    id: "run-7".to_string(),
                    workflow_name: "sync".to_string(),
                    status: RunStatus::Failed,
                    success: false,
                    started_at: Utc::now(),
                    output: None,
                }]),
            },
            t0,
        );
        c.handle(
            AppEvent::RunTriggered {
                workflow: "daily_report".to_string(),
                result: Ok(TriggeredRun {
                    id: "run-42".to_string(),
                    workflow_name: "daily_report".to_string(),
                }),
            },
            t0,
        );
        c.handle(AppEvent::NoticeExpired { id: 1 }, t0);

        let screen = draw(&c, &Composer::new(), t0 + Duration::from_secs(12));
        assert!(screen.contains("status?"), "{screen}");
        assert!(screen.contains("All green▌"), "{screen}");
        assert!(screen.contains("● 1 running"), "{screen}");
        assert!(screen.contains("! 1 new"), "{screen}");
        assert!(screen.contains("daily_report run-42"), "{screen}");
        assert!(screen.contains("Ctrl+X cancels daily_report (run-42) · 18s"), "{screen}");
    }

    #[test]
    fn status_line_shows_reauth_and_confirmation() {
        let mut c = Coordinator::new(CoreSettings::default(), ChatTarget::agent("planner"));
        let t0 = Instant::now();
        c.handle(
            AppEvent::RunsRefreshed {
                origin: RefreshOrigin::Manual,
                seq: 1,
                result: Err(conductor_backend_client::ApiError::AuthExpired { status: 401 }),
            },
            t0,
        );
        c.handle(AppEvent::Action(UserAction::Quit), t0);

        let screen = draw(&c, &Composer::new(), t0);
        assert!(screen.contains("Session expired: /login or Ctrl+A"), "{screen}");
        assert!(screen.contains("Quit again to exit (Ctrl+D or /quit)"), "{screen}");
        assert!(screen.contains("@planner"), "{screen}");
    }

    #[test]
    fn remaining_rounds_up() {
        assert_eq!(format_remaining(Duration::from_millis(100)), "1s");
        assert_eq!(format_remaining(Duration::from_secs(30)), "30s");
        assert_eq!(format_remaining(Duration::ZERO), "0s");
    }
}
