use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, value},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, separated_pair},
    IResult,
};

use crate::document::{Embed, PushOptions, SearchOptions, Source};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::model::{MetaValue, Metadata, Payload};
use crate::vector::Metric;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Push { data: Payload, options: PushOptions },
    Pull { source: Source, filter: Filter },
    Search { query: String, options: SearchOptions },
    Use { doc: String },
    Docs,
    Info,
    Orphans,
    Help,
    Exit,
}

#[derive(Debug, PartialEq, Clone)]
enum Clause {
    Key(String),
    Description(String),
    Meta(Metadata),
    DataType(String),
    NoEmbed,
    From(Source),
    Uids(Vec<String>),
    Time(String),
    Date(String),
    Where(Metadata),
    Limit(usize),
    By(Metric),
    Embeddings,
}

// --- BASIC PARSERS ---

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || "_-.:[]".contains(c))(input)
}

/// Quoted string or bare word
fn parse_text(input: &str) -> IResult<&str, String> {
    alt((parse_quoted_string, map(parse_word, str::to_string)))(input)
}

fn parse_meta_value(input: &str) -> IResult<&str, MetaValue> {
    alt((
        map(parse_quoted_string, MetaValue::String),
        map(parse_word, |w| {
            if w.eq_ignore_ascii_case("true") {
                MetaValue::Boolean(true)
            } else if w.eq_ignore_ascii_case("false") {
                MetaValue::Boolean(false)
            } else if let Ok(n) = w.parse::<i64>() {
                MetaValue::Integer(n)
            } else if let Ok(f) = w.parse::<f64>() {
                MetaValue::Float(f)
            } else {
                MetaValue::String(w.to_string())
            }
        }),
    ))(input)
}

/// Bare words are typed the same way metadata values are
fn parse_payload(input: &str) -> IResult<&str, Payload> {
    map(parse_meta_value, |v| match v {
        MetaValue::Boolean(b) => Payload::Boolean(b),
        MetaValue::Integer(n) => Payload::Integer(n),
        MetaValue::Float(f) => Payload::Float(f),
        MetaValue::String(s) => Payload::Text(s),
    })(input)
}

fn parse_pairs(input: &str) -> IResult<&str, Metadata> {
    map(
        separated_list1(
            ws(char(',')),
            separated_pair(parse_word, ws(char('=')), parse_meta_value),
        ),
        |pairs| pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    )(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

/// `KEYWORD <arg>`
fn keyword<'a, O>(
    kw: &'static str,
    arg: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    preceded(tag_ci(kw), preceded(multispace1, arg))
}

// --- CLAUSES ---

fn key_clause(input: &str) -> IResult<&str, Clause> {
    map(keyword("KEY", parse_text), Clause::Key)(input)
}

fn time_clause(input: &str) -> IResult<&str, Clause> {
    map(keyword("TIME", parse_text), Clause::Time)(input)
}

fn date_clause(input: &str) -> IResult<&str, Clause> {
    map(keyword("DATE", parse_text), Clause::Date)(input)
}

fn where_clause(input: &str) -> IResult<&str, Clause> {
    map(keyword("WHERE", parse_pairs), Clause::Where)(input)
}

fn push_clause(input: &str) -> IResult<&str, Clause> {
    alt((
        key_clause,
        map(
            preceded(
                alt((tag_ci("DESCRIPTION"), tag_ci("DESC"))),
                preceded(multispace1, parse_quoted_string),
            ),
            Clause::Description,
        ),
        map(
            preceded(
                alt((tag_ci("METADATA"), tag_ci("META"))),
                preceded(multispace1, parse_pairs),
            ),
            Clause::Meta,
        ),
        map(keyword("TYPE", parse_text), Clause::DataType),
        value(Clause::NoEmbed, tag_ci("NOEMBED")),
    ))(input)
}

fn pull_clause(input: &str) -> IResult<&str, Clause> {
    alt((
        map(
            keyword("FROM", map_res(parse_word, str::parse::<Source>)),
            Clause::From,
        ),
        map(
            keyword("UID", separated_list1(ws(char(',')), parse_text)),
            Clause::Uids,
        ),
        key_clause,
        time_clause,
        date_clause,
        where_clause,
    ))(input)
}

fn search_clause(input: &str) -> IResult<&str, Clause> {
    alt((
        map(
            keyword("LIMIT", map_res(digit1, str::parse::<usize>)),
            Clause::Limit,
        ),
        map(
            keyword("BY", map_res(parse_word, str::parse::<Metric>)),
            Clause::By,
        ),
        map(
            keyword("UID", separated_list1(ws(char(',')), parse_text)),
            Clause::Uids,
        ),
        key_clause,
        time_clause,
        date_clause,
        where_clause,
        value(Clause::Embeddings, tag_ci("EMBEDDINGS")),
    ))(input)
}

/// Fold a selector clause into `filter`; other clauses are ignored
fn apply_filter(filter: &mut Filter, clause: Clause) {
    match clause {
        Clause::Uids(uids) => filter.uids.get_or_insert_with(Vec::new).extend(uids),
        Clause::Key(key) => filter.key = Some(key),
        Clause::Time(time) => filter.time = Some(time),
        Clause::Date(date) => filter.date = Some(date),
        Clause::Where(pairs) => filter.metadata.get_or_insert_with(Metadata::new).extend(pairs),
        _ => {}
    }
}

// --- COMMAND PARSERS ---

fn parse_push(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("PUSH")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, data) = parse_payload(input)?;
    let (input, clauses) = many0(preceded(multispace1, push_clause))(input)?;

    let mut options = PushOptions::new();
    for clause in clauses {
        match clause {
            Clause::Key(key) => options.key = Some(key),
            Clause::Description(desc) => options.description = Some(desc),
            Clause::Meta(pairs) => options.metadata.get_or_insert_with(Metadata::new).extend(pairs),
            Clause::DataType(t) => options.data_type = Some(t),
            Clause::NoEmbed => options.embed = Embed::Skip,
            _ => {}
        }
    }
    Ok((input, Command::Push { data, options }))
}

fn parse_pull(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("PULL")(input)?;
    let (input, clauses) = many0(preceded(multispace1, pull_clause))(input)?;

    let mut source = Source::default();
    let mut filter = Filter::new();
    for clause in clauses {
        if let Clause::From(s) = clause {
            source = s;
        } else {
            apply_filter(&mut filter, clause);
        }
    }
    Ok((input, Command::Pull { source, filter }))
}

fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SEARCH"), tag_ci("FIND")))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, query) = parse_text(input)?;
    let (input, clauses) = many0(preceded(multispace1, search_clause))(input)?;

    let mut options = SearchOptions::new();
    for clause in clauses {
        match clause {
            Clause::Limit(n) => options.top_n = n,
            Clause::By(metric) => options.metric = metric,
            Clause::Embeddings => options.include_embeddings = true,
            other => apply_filter(&mut options.filter, other),
        }
    }
    Ok((input, Command::Search { query, options }))
}

fn parse_use(input: &str) -> IResult<&str, Command> {
    map(keyword("USE", parse_text), |doc| Command::Use { doc })(input)
}

fn parse_simple(input: &str) -> IResult<&str, Command> {
    alt((
        value(Command::Docs, tag_ci("DOCS")),
        value(Command::Info, tag_ci("INFO")),
        value(Command::Orphans, tag_ci("ORPHANS")),
        value(Command::Help, tag_ci("HELP")),
        value(Command::Exit, alt((tag_ci("EXIT"), tag_ci("QUIT")))),
    ))(input)
}

pub fn parse_command(input: &str) -> Result<Command> {
    let input = input.trim();
    let result = alt((parse_push, parse_pull, parse_search, parse_use, parse_simple))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "Unexpected tokens at end: '{}'",
                    remainder.trim()
                )));
            }
            Ok(cmd)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            let ellipsis = if e.input.chars().count() > 20 { "..." } else { "" };
            Err(Error::InvalidArgument(format!(
                "Invalid syntax near: '{context}{ellipsis}'"
            )))
        }
        Err(nom::Err::Incomplete(_)) => Err(Error::InvalidArgument("Incomplete command.".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_minimal() {
        let cmd = parse_command(r#"PUSH "hello world""#).unwrap();
        assert_eq!(
            cmd,
            Command::Push {
                data: Payload::Text("hello world".into()),
                options: PushOptions::new(),
            }
        );
    }

    #[test]
    fn test_push_with_clauses_in_any_order() {
        let cmd = parse_command(
            r#"push "deploy done" META env="prod", build=42 noembed KEY deploys DESC "from ci" TYPE event"#,
        )
        .unwrap();
        let Command::Push { data, options } = cmd else {
            panic!("expected push");
        };
        assert_eq!(data, Payload::Text("deploy done".into()));
        assert_eq!(options.key.as_deref(), Some("deploys"));
        assert_eq!(options.description.as_deref(), Some("from ci"));
        assert_eq!(options.data_type.as_deref(), Some("event"));
        assert_eq!(options.embed, Embed::Skip);
        let meta = options.metadata.unwrap();
        assert_eq!(meta["env"], MetaValue::String("prod".into()));
        assert_eq!(meta["build"], MetaValue::Integer(42));
    }

    #[test]
    fn test_push_bare_values_are_typed() {
        let Command::Push { data, .. } = parse_command("PUSH 12").unwrap() else {
            panic!("expected push");
        };
        assert_eq!(data, Payload::Integer(12));
        let Command::Push { data, .. } = parse_command("PUSH 1.5").unwrap() else {
            panic!("expected push");
        };
        assert_eq!(data, Payload::Float(1.5));
        let Command::Push { data, .. } = parse_command("PUSH true").unwrap() else {
            panic!("expected push");
        };
        assert_eq!(data, Payload::Boolean(true));
    }

    #[test]
    fn test_pull_everything() {
        assert_eq!(
            parse_command("PULL").unwrap(),
            Command::Pull {
                source: Source::Payload,
                filter: Filter::new(),
            }
        );
    }

    #[test]
    fn test_pull_with_filters() {
        let cmd = parse_command("PULL FROM index KEY deploys TIME 14:05 DATE 01-02 WHERE env=prod").unwrap();
        assert_eq!(
            cmd,
            Command::Pull {
                source: Source::Index,
                filter: Filter::new()
                    .key("deploys")
                    .time("14:05")
                    .date("01-02")
                    .where_eq("env", "prod"),
            }
        );
    }

    #[test]
    fn test_pull_by_uids() {
        let cmd = parse_command(r#"PULL FROM vector UID abc, "def""#).unwrap();
        assert_eq!(
            cmd,
            Command::Pull {
                source: Source::Vector,
                filter: Filter::new().uids(["abc", "def"]),
            }
        );
    }

    #[test]
    fn test_pull_bad_source_is_error() {
        assert!(parse_command("PULL FROM blobs").is_err());
    }

    #[test]
    fn test_search() {
        let cmd = parse_command(r#"SEARCH "borrow checker" LIMIT 3 BY cs KEY notes EMBEDDINGS"#).unwrap();
        assert_eq!(
            cmd,
            Command::Search {
                query: "borrow checker".into(),
                options: SearchOptions::new()
                    .top_n(3)
                    .metric(Metric::Cosine)
                    .filter(Filter::new().key("notes"))
                    .include_embeddings(true),
            }
        );
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("docs").unwrap(), Command::Docs);
        assert_eq!(parse_command("INFO").unwrap(), Command::Info);
        assert_eq!(parse_command("orphans").unwrap(), Command::Orphans);
        assert_eq!(parse_command("help").unwrap(), Command::Help);
        assert_eq!(parse_command("quit").unwrap(), Command::Exit);
        assert_eq!(
            parse_command("USE log-[01_02_2024]").unwrap(),
            Command::Use { doc: "log-[01_02_2024]".into() }
        );
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse_command("INFO please").unwrap_err();
        assert!(err.to_string().contains("Unexpected tokens"));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = parse_command("DROP TABLE logs").unwrap_err();
        assert!(err.to_string().contains("Invalid syntax"));
    }
}
