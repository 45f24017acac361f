use crate::metadata::TemplateContext;
use crate::sanitize::sanitize_component;
use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDateTime;
use std::fmt::Write as _;
use thiserror::Error;

pub trait TemplateEngine: Send + Sync {
    fn compile(&self, source: &str) -> Result<Box<dyn CompiledTemplate>, CompileError>;
}

pub trait CompiledTemplate: Send + Sync {
    fn render(&self, context: &TemplateContext) -> Result<String, RenderError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("`{{{{` に対応する `}}}}` がありません")]
    Unclosed,
    #[error("空の式があります")]
    EmptyExpression,
    #[error("`{{%` タグには対応していません")]
    UnsupportedTag,
    #[error("変数は `ディレクトリ.名前` の形式で指定してください: {0}")]
    InvalidVariable(String),
    #[error("未対応フィルタです: {0}")]
    UnknownFilter(String),
    #[error("フィルタの引数が不正です: {0}")]
    InvalidArguments(String),
    #[error("日付書式が不正です: {0}")]
    InvalidDateFormat(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("日付として解釈できません: {0}")]
    InvalidDate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Output(Expression),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub directory: String,
    pub name: String,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Upcase,
    Downcase,
    Strip,
    Default(String),
    Replace(String, String),
    Slice(i64, usize),
    Date(String),
    Filename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LiquidEngine;

impl TemplateEngine for LiquidEngine {
    fn compile(&self, source: &str) -> Result<Box<dyn CompiledTemplate>, CompileError> {
        let parts = parse_template(source)?;
        Ok(Box::new(LiquidTemplate { parts }))
    }
}

#[derive(Debug, Clone)]
pub struct LiquidTemplate {
    parts: Vec<TemplatePart>,
}

impl CompiledTemplate for LiquidTemplate {
    fn render(&self, context: &TemplateContext) -> Result<String, RenderError> {
        render_template(&self.parts, context)
    }
}

pub fn validate_template(input: &str) -> Result<(), CompileError> {
    parse_template(input).map(|_| ())
}

pub fn parse_template(input: &str) -> Result<Vec<TemplatePart>, CompileError> {
    let mut parts = Vec::new();
    let mut rest = input;

    loop {
        let open = match (rest.find("{{"), rest.find("{%")) {
            (Some(out), Some(tag)) if tag < out => return Err(CompileError::UnsupportedTag),
            (None, Some(_)) => return Err(CompileError::UnsupportedTag),
            (Some(out), _) => out,
            (None, None) => break,
        };
        if open > 0 {
            parts.push(TemplatePart::Literal(rest[..open].to_string()));
        }
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or(CompileError::Unclosed)?;
        parts.push(TemplatePart::Output(parse_expression(&after_open[..close])?));
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        parts.push(TemplatePart::Literal(rest.to_string()));
    }

    Ok(parts)
}

pub fn render_template(
    parts: &[TemplatePart],
    context: &TemplateContext,
) -> Result<String, RenderError> {
    let mut output = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(s) => output.push_str(s),
            TemplatePart::Output(expr) => output.push_str(&evaluate(expr, context)?),
        }
    }
    Ok(output)
}

fn evaluate(expr: &Expression, context: &TemplateContext) -> Result<String, RenderError> {
    let mut value = context
        .get(&expr.directory)
        .and_then(|values| values.get(&expr.name))
        .cloned();

    for filter in &expr.filters {
        value = match (filter, value) {
            (Filter::Default(fallback), None) => Some(fallback.clone()),
            (Filter::Default(fallback), Some(v)) if v.is_empty() => Some(fallback.clone()),
            (_, None) => None,
            (filter, Some(v)) => Some(apply_filter(filter, v)?),
        };
    }

    // Undefined variables render empty, as in Liquid.
    Ok(value.unwrap_or_default())
}

fn apply_filter(filter: &Filter, value: String) -> Result<String, RenderError> {
    let out = match filter {
        Filter::Upcase => value.to_uppercase(),
        Filter::Downcase => value.to_lowercase(),
        Filter::Strip => value.trim().to_string(),
        Filter::Default(_) => value,
        Filter::Replace(from, to) => value.replace(from.as_str(), to),
        Filter::Slice(start, len) => slice_chars(&value, *start, *len),
        Filter::Date(format) => format_date(&value, format)?,
        Filter::Filename => sanitize_component(&value),
    };
    Ok(out)
}

fn slice_chars(value: &str, start: i64, len: usize) -> String {
    let count = value.chars().count() as i64;
    let begin = if start < 0 { count + start } else { start };
    if begin < 0 || begin >= count {
        return String::new();
    }
    value.chars().skip(begin as usize).take(len).collect()
}

fn format_date(value: &str, format: &str) -> Result<String, RenderError> {
    let parsed = parse_date(value).ok_or_else(|| RenderError::InvalidDate(value.to_string()))?;
    let mut out = String::new();
    // Offset specifiers cannot be rendered from a naive timestamp.
    write!(out, "{}", parsed.format(format))
        .map_err(|_| RenderError::InvalidDate(value.to_string()))?;
    Ok(out)
}

fn parse_date(input: &str) -> Option<NaiveDateTime> {
    let normalized = input.trim();

    let candidates = [
        "%Y:%m:%d %H:%M:%S",
        "%Y:%m:%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    candidates
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(normalized, fmt).ok())
}

fn parse_expression(raw: &str) -> Result<Expression, CompileError> {
    let segments = split_unquoted(raw, '|');
    let variable = segments[0].trim();
    if variable.is_empty() {
        return Err(CompileError::EmptyExpression);
    }

    let (directory, name) = variable
        .split_once('.')
        .filter(|(d, n)| is_identifier(d) && is_identifier(n))
        .ok_or_else(|| CompileError::InvalidVariable(variable.to_string()))?;

    let filters = segments[1..]
        .iter()
        .map(|segment| parse_filter(segment.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Expression {
        directory: directory.to_string(),
        name: name.to_string(),
        filters,
    })
}

fn parse_filter(segment: &str) -> Result<Filter, CompileError> {
    let (name, args) = match segment.split_once(':') {
        Some((name, args)) => (name.trim(), parse_args(args)?),
        None => (segment, Vec::new()),
    };
    let bad_args = || CompileError::InvalidArguments(segment.to_string());

    let filter = match (name, args.as_slice()) {
        ("upcase", []) => Filter::Upcase,
        ("downcase", []) => Filter::Downcase,
        ("strip", []) => Filter::Strip,
        ("filename", []) => Filter::Filename,
        ("default", [Arg::Str(v)]) => Filter::Default(v.clone()),
        ("replace", [Arg::Str(from), Arg::Str(to)]) => {
            if from.is_empty() {
                return Err(bad_args());
            }
            Filter::Replace(from.clone(), to.clone())
        }
        ("slice", [Arg::Int(start)]) => Filter::Slice(*start, 1),
        ("slice", [Arg::Int(start), Arg::Int(len)]) => {
            let len = usize::try_from(*len).map_err(|_| bad_args())?;
            Filter::Slice(*start, len)
        }
        ("date", [Arg::Str(format)]) => {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(CompileError::InvalidDateFormat(format.clone()));
            }
            Filter::Date(format.clone())
        }
        ("upcase" | "downcase" | "strip" | "filename" | "default" | "replace" | "slice"
        | "date", _) => return Err(bad_args()),
        (other, _) => return Err(CompileError::UnknownFilter(other.to_string())),
    };
    Ok(filter)
}

fn parse_args(raw: &str) -> Result<Vec<Arg>, CompileError> {
    split_unquoted(raw, ',')
        .into_iter()
        .map(|arg| {
            let arg = arg.trim();
            let quoted = (arg.len() >= 2)
                && ((arg.starts_with('"') && arg.ends_with('"'))
                    || (arg.starts_with('\'') && arg.ends_with('\'')));
            if quoted {
                Ok(Arg::Str(arg[1..arg.len() - 1].to_string()))
            } else {
                arg.parse::<i64>()
                    .map(Arg::Int)
                    .map_err(|_| CompileError::InvalidArguments(arg.to_string()))
            }
        })
        .collect()
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0usize;

    for (idx, ch) in input.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == separator => {
                out.push(&input[start..idx]);
                start = idx + ch.len_utf8();
            }
            None => {}
        }
    }
    out.push(&input[start..]);
    out
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{build_context, MetadataEntry};

    fn context() -> TemplateContext {
        build_context(&[
            MetadataEntry::new("Exif IFD0", "Make", "Canon"),
            MetadataEntry::new("Exif IFD0", "Model", "EOS R5"),
            MetadataEntry::new("Exif SubIFD", "DateTimeOriginal", "2021:07:04 09:30:15"),
            MetadataEntry::new("File", "Extension", "jpg"),
            MetadataEntry::new("File", "Note", "a/b: c"),
        ])
    }

    fn render(source: &str) -> Result<String, RenderError> {
        let template = LiquidEngine.compile(source).expect("must compile");
        template.render(&context())
    }

    #[test]
    fn parse_template_ok() {
        let parsed = parse_template("IMG_{{ ExifIFD0.Make }}.{{File.Extension}}").expect("parse");
        assert_eq!(parsed.len(), 4);
        assert!(matches!(&parsed[0], TemplatePart::Literal(s) if s == "IMG_"));
    }

    #[test]
    fn empty_template_compiles_to_nothing() {
        assert!(parse_template("").expect("parse").is_empty());
        assert_eq!(render("").expect("render"), "");
    }

    #[test]
    fn parse_template_invalid_brace() {
        assert_eq!(parse_template("{{ File.Extension"), Err(CompileError::Unclosed));
        assert_eq!(parse_template("{{ }}"), Err(CompileError::EmptyExpression));
        assert_eq!(
            parse_template("{% if x %}"),
            Err(CompileError::UnsupportedTag)
        );
    }

    #[test]
    fn parse_template_invalid_variable_and_filter() {
        assert!(matches!(
            parse_template("{{ Make }}"),
            Err(CompileError::InvalidVariable(_))
        ));
        assert!(matches!(
            parse_template("{{ File.Extension | shout }}"),
            Err(CompileError::UnknownFilter(_))
        ));
        assert!(matches!(
            parse_template("{{ File.Extension | replace: \"a\" }}"),
            Err(CompileError::InvalidArguments(_))
        ));
        assert!(matches!(
            parse_template("{{ File.Extension | date: \"%Q\" }}"),
            Err(CompileError::InvalidDateFormat(_))
        ));
    }

    #[test]
    fn qualified_name_round_trips_value() {
        assert_eq!(render("{{ExifIFD0.Model}}").expect("render"), "EOS R5");
        assert_eq!(render("{{File.Note}}").expect("render"), "a/b: c");
    }

    #[test]
    fn render_applies_filters_in_order() {
        assert_eq!(
            render("{{ ExifIFD0.Model | replace: \" \", \"-\" | downcase }}").expect("render"),
            "eos-r5"
        );
        assert_eq!(render("{{ ExifIFD0.Make | upcase }}").expect("render"), "CANON");
        assert_eq!(render("{{ ExifIFD0.Make | slice: 0, 3 }}").expect("render"), "Can");
        assert_eq!(render("{{ ExifIFD0.Make | slice: -1 }}").expect("render"), "n");
        assert_eq!(render("{{ File.Note | filename }}").expect("render"), "a_b_ c");
    }

    #[test]
    fn render_formats_exif_dates() {
        assert_eq!(
            render("{{ ExifSubIFD.DateTimeOriginal | date: \"%Y%m%d_%H%M%S\" }}").expect("render"),
            "20210704_093015"
        );
        assert!(matches!(
            render("{{ ExifIFD0.Make | date: \"%Y\" }}"),
            Err(RenderError::InvalidDate(_))
        ));
    }

    #[test]
    fn missing_variable_renders_empty_unless_defaulted() {
        assert_eq!(render("{{ GPS.Latitude }}").expect("render"), "");
        assert_eq!(
            render("a_{{ GPS.Latitude | upcase | date: \"%Y\" }}_b").expect("render"),
            "a__b"
        );
        assert_eq!(
            render("{{ GPS.Latitude | default: 'nogps' | upcase }}").expect("render"),
            "NOGPS"
        );
    }

    #[test]
    fn default_template_without_exif_keeps_the_extension() {
        let context = build_context(&[MetadataEntry::new("File", "Extension", "png")]);
        let name = LiquidEngine
            .compile(crate::DEFAULT_TEMPLATE)
            .expect("compile")
            .render(&context)
            .expect("render");
        assert_eq!(name, "_##.png");
    }

    #[test]
    fn quoted_pipes_and_commas_stay_inside_arguments() {
        assert_eq!(
            render("{{ ExifIFD0.Model | replace: \"|\", \",\" | default: 'x,y' }}")
                .expect("render"),
            "EOS R5"
        );
    }
}
