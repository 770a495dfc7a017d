//! 定型时生成的章节与媒体中心文件

use super::chapter::Chapter;
use chrono::{DateTime, Datelike, Utc};

fn chapter_label_game_first(chapter: &Chapter) -> String {
    match chapter.game_name() {
        Some(game) if !game.is_empty() => format!("{} ({})", game, chapter.title),
        _ => chapter.title.clone(),
    }
}

fn chapter_label_title_first(chapter: &Chapter) -> String {
    match chapter.game_name() {
        Some(game) if !game.is_empty() => format!("{} ({})", chapter.title, game),
        _ => chapter.title.clone(),
    }
}

/// LosslessCut 剪辑点 CSV，最后一行结束时间留空
pub fn losslesscut_csv(chapters: &[Chapter]) -> String {
    let mut out = String::new();
    for (i, chapter) in chapters.iter().enumerate() {
        let offset = chapter.offset.unwrap_or(0.0);
        let end = if i + 1 == chapters.len() {
            String::new()
        } else {
            format!("{}", offset + chapter.duration.unwrap_or(0.0))
        };
        let label = chapter_label_game_first(chapter).replace('"', "\"\"");
        out.push_str(&format!("{},{},\"{}\"\n", offset, end, label));
    }
    out
}

fn escape_ffmetadata(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// FFMETADATA 章节文件，时间单位毫秒
pub fn ffmpeg_chapters(chapters: &[Chapter]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    for chapter in chapters {
        let start = (chapter.offset.unwrap_or(0.0) * 1000.0).round() as u64;
        let end = start + (chapter.duration.unwrap_or(0.0) * 1000.0).round() as u64;
        out.push_str("\n[CHAPTER]\nTIMEBASE=1/1000\n");
        out.push_str(&format!("START={}\nEND={}\n", start, end));
        out.push_str(&format!("title={}\n", escape_ffmetadata(&chapter_label_title_first(chapter))));
    }
    out
}

/// 秒 → hh:mm:ss.mmm
pub fn format_vtt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}

/// WebVTT 章节
pub fn vtt_chapters(chapters: &[Chapter], app_name: &str) -> String {
    let mut out = format!("WEBVTT - Generated by {}\n\n", app_name);
    for (i, chapter) in chapters.iter().enumerate() {
        let start = chapter.offset.unwrap_or(0.0);
        let end = start + chapter.duration.unwrap_or(0.0);
        out.push_str(&format!("Chapter {}\n", i + 1));
        out.push_str(&format!("{} --> {}\n", format_vtt_timestamp(start), format_vtt_timestamp(end)));
        out.push_str(&format!("{}\n\n", chapter_label_title_first(chapter)));
    }
    out
}

/// NFO 所需的 VOD 信息
pub struct NfoInfo<'a> {
    pub title: &'a str,
    pub show_title: &'a str,
    pub provider: &'a str,
    pub unique_id: &'a str,
    pub uuid: &'a str,
    pub season: Option<&'a str>,
    pub episode: Option<u32>,
    pub duration: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub chapters: &'a [Chapter],
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Kodi episodedetails
pub fn kodi_nfo(info: &NfoInfo<'_>) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
    out.push_str("<episodedetails>\n");
    out.push_str(&format!("\t<title>{}</title>\n", xml_escape(info.title)));
    out.push_str(&format!("\t<showtitle>{}</showtitle>\n", xml_escape(info.show_title)));
    out.push_str(&format!(
        "\t<uniqueid type=\"{}\" default=\"true\">{}</uniqueid>\n",
        xml_escape(info.provider),
        xml_escape(info.unique_id)
    ));
    if let Some(season) = info.season {
        out.push_str(&format!("\t<season>{}</season>\n", xml_escape(season)));
    }
    if let Some(episode) = info.episode {
        out.push_str(&format!("\t<episode>{}</episode>\n", episode));
    }

    let plot: Vec<String> = info
        .chapters
        .iter()
        .map(|c| format!("{} {}", format_vtt_timestamp(c.offset.unwrap_or(0.0)), chapter_label_game_first(c)))
        .collect();
    out.push_str(&format!("\t<plot>{}</plot>\n", xml_escape(&plot.join("\n"))));

    if let Some(duration) = info.duration {
        out.push_str(&format!("\t<runtime>{}</runtime>\n", (duration / 60.0).ceil() as u64));
    }
    out.push_str("\t<actor>\n");
    out.push_str(&format!("\t\t<name>{}</name>\n", xml_escape(info.show_title)));
    out.push_str("\t\t<role>Themselves</role>\n");
    out.push_str("\t</actor>\n");
    if let Some(started_at) = info.started_at {
        let date = started_at.format("%Y-%m-%d").to_string();
        out.push_str(&format!("\t<premiered>{}</premiered>\n", date));
        out.push_str(&format!("\t<aired>{}</aired>\n", date));
        out.push_str(&format!("\t<dateadded>{}</dateadded>\n", started_at.format("%Y-%m-%d %H:%M:%S")));
        out.push_str(&format!("\t<year>{}</year>\n", started_at.year()));
    }
    out.push_str(&format!("\t<studio>{}</studio>\n", xml_escape(info.provider)));
    out.push_str(&format!("\t<id>{}</id>\n", xml_escape(info.uuid)));
    out.push_str("</episodedetails>\n");
    out
}
