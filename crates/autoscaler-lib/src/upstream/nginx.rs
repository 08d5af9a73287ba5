//! Minimal nginx configuration model
//!
//! Parses the directive/block grammar into a tree and dumps it back with
//! four-space indentation. Comments survive a round trip; blank lines and
//! original indentation do not.

use thiserror::Error;

/// Parse failure with the 1-based line it occurred on
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A node inside a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directive(Directive),
    /// Text following `#`, without the newline
    Comment(String),
}

/// `name arg1 arg2;` or `name args { ... }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Option<Vec<Node>>,
}

impl Directive {
    pub fn simple(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            block: None,
        }
    }
}

/// Parsed nginx configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NginxConfig {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Open,
    Close,
    Semicolon,
    Comment(String),
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                chars.next();
                let mut comment = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    comment.push(c);
                    chars.next();
                }
                tokens.push((Token::Comment(comment.trim_end().to_string()), line));
            }
            '{' => {
                chars.next();
                tokens.push((Token::Open, line));
            }
            '}' => {
                chars.next();
                tokens.push((Token::Close, line));
            }
            ';' => {
                chars.next();
                tokens.push((Token::Semicolon, line));
            }
            '"' | '\'' => {
                let start = line;
                let quote = c;
                let mut word = String::new();
                word.push(quote);
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    word.push(c);
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                if escaped == '\n' {
                                    line += 1;
                                }
                                word.push(escaped);
                            }
                        }
                        '\n' => line += 1,
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(ParseError::new(start, "unterminated quoted string"));
                }
                tokens.push((Token::Word(word), start));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | ';') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                    // `${var}` is part of the word, braces included
                    if c == '$' && chars.peek() == Some(&'{') {
                        for c in chars.by_ref() {
                            word.push(c);
                            if c == '}' {
                                break;
                            }
                        }
                    }
                }
                tokens.push((Token::Word(word), line));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map(|(_, line)| *line).unwrap_or(1)
    }

    /// Parse nodes until the matching `}` (nested) or end of input (top level)
    fn parse_block(&mut self, nested: bool) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();

        loop {
            let Some((token, line)) = self.next() else {
                if nested {
                    return Err(ParseError::new(self.last_line(), "unexpected end of file, expecting '}'"));
                }
                return Ok(nodes);
            };

            match token {
                Token::Comment(text) => nodes.push(Node::Comment(text)),
                Token::Close if nested => return Ok(nodes),
                Token::Close => return Err(ParseError::new(line, "unexpected '}'")),
                Token::Semicolon => return Err(ParseError::new(line, "unexpected ';'")),
                Token::Open => return Err(ParseError::new(line, "unexpected '{'")),
                Token::Word(name) => {
                    let directive = self.parse_directive(name, line, &mut nodes)?;
                    nodes.push(Node::Directive(directive));
                }
            }
        }
    }

    /// Collect arguments up to `;` or a block. Comments found between
    /// arguments are hoisted in front of the directive.
    fn parse_directive(
        &mut self,
        name: String,
        line: usize,
        hoisted: &mut Vec<Node>,
    ) -> Result<Directive, ParseError> {
        let mut args = Vec::new();

        loop {
            let Some((token, _)) = self.next() else {
                return Err(ParseError::new(
                    line,
                    format!("directive '{}' is not terminated by ';' or '{{'", name),
                ));
            };

            match token {
                Token::Word(arg) => args.push(arg),
                Token::Comment(text) => hoisted.push(Node::Comment(text)),
                Token::Semicolon => return Ok(Directive { name, args, block: None }),
                Token::Open => {
                    let block = self.parse_block(true)?;
                    return Ok(Directive {
                        name,
                        args,
                        block: Some(block),
                    });
                }
                Token::Close => {
                    return Err(ParseError::new(
                        line,
                        format!("directive '{}' is not terminated by ';'", name),
                    ))
                }
            }
        }
    }
}

impl NginxConfig {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let nodes = parser.parse_block(false)?;
        Ok(Self { nodes })
    }

    /// Render with four-space indentation
    pub fn dump(&self) -> String {
        let mut out = String::new();
        dump_nodes(&self.nodes, 0, &mut out);
        out
    }

    /// All `upstream` blocks, depth-first in file order
    pub fn upstreams(&self) -> Vec<&Directive> {
        let mut found = Vec::new();
        collect_upstreams(&self.nodes, &mut found);
        found
    }

    /// First `upstream` block, depth-first in file order
    pub fn first_upstream_mut(&mut self) -> Option<&mut Directive> {
        find_upstream_mut(&mut self.nodes)
    }
}

fn is_upstream(directive: &Directive) -> bool {
    directive.name == "upstream" && directive.block.is_some()
}

fn collect_upstreams<'a>(nodes: &'a [Node], found: &mut Vec<&'a Directive>) {
    for node in nodes {
        if let Node::Directive(directive) = node {
            if is_upstream(directive) {
                found.push(directive);
            } else if let Some(block) = &directive.block {
                collect_upstreams(block, found);
            }
        }
    }
}

fn find_upstream_mut(nodes: &mut [Node]) -> Option<&mut Directive> {
    for node in nodes.iter_mut() {
        if let Node::Directive(directive) = node {
            if is_upstream(directive) {
                return Some(directive);
            }
            if let Some(block) = directive.block.as_mut() {
                if let Some(found) = find_upstream_mut(block) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn dump_nodes(nodes: &[Node], depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);

    for (i, node) in nodes.iter().enumerate() {
        match node {
            Node::Comment(text) => {
                out.push_str(&indent);
                out.push('#');
                out.push_str(text);
                out.push('\n');
            }
            Node::Directive(directive) => {
                if directive.block.is_some() && i > 0 {
                    out.push('\n');
                }
                out.push_str(&indent);
                out.push_str(&directive.name);
                for arg in &directive.args {
                    out.push(' ');
                    out.push_str(arg);
                }
                match &directive.block {
                    Some(block) => {
                        out.push_str(" {\n");
                        dump_nodes(block, depth + 1, out);
                        out.push_str(&indent);
                        out.push_str("}\n");
                    }
                    None => out.push_str(";\n"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOAD_BALANCER_CONF: &str = r#"
events {
    worker_connections 1024;
}

http {
    upstream load_balancer {
        server modest_mcnulty:80;
    }

    server {
        listen 80;

        location / {
            proxy_pass http://load_balancer;
        }
    }
}
"#;

    #[test]
    fn test_parse_load_balancer_conf() {
        let config = NginxConfig::parse(LOAD_BALANCER_CONF).unwrap();

        assert_eq!(config.nodes.len(), 2);
        let upstreams = config.upstreams();
        assert_eq!(upstreams.len(), 1);
        assert_eq!(upstreams[0].args, vec!["load_balancer".to_string()]);

        let block = upstreams[0].block.as_ref().unwrap();
        assert_eq!(
            block[0],
            Node::Directive(Directive::simple("server", vec!["modest_mcnulty:80".into()]))
        );
    }

    #[test]
    fn test_dump_is_stable() {
        let config = NginxConfig::parse(LOAD_BALANCER_CONF).unwrap();
        let dumped = config.dump();
        let reparsed = NginxConfig::parse(&dumped).unwrap();

        assert_eq!(reparsed, config);
        assert_eq!(reparsed.dump(), dumped);
        assert!(dumped.contains("    upstream load_balancer {\n        server modest_mcnulty:80;\n    }\n"));
    }

    #[test]
    fn test_comments_and_quotes_survive() {
        let text = r#"# managed by the autoscaler
http {
    log_format main '$remote_addr - "$request"';
    add_header X-Note "a { brace ; inside";
    upstream pool { # replicas
        server web_1:80 weight=2;
    }
}
"#;
        let config = NginxConfig::parse(text).unwrap();
        let dumped = config.dump();

        assert!(dumped.starts_with("# managed by the autoscaler\n"));
        assert!(dumped.contains(r#"log_format main '$remote_addr - "$request"';"#));
        assert!(dumped.contains(r#"add_header X-Note "a { brace ; inside";"#));
        assert!(dumped.contains("# replicas"));
        assert_eq!(NginxConfig::parse(&dumped).unwrap(), config);
    }

    #[test]
    fn test_variable_braces_are_part_of_word() {
        let config = NginxConfig::parse("return 301 https://${host}$request_uri;").unwrap();
        match &config.nodes[0] {
            Node::Directive(d) => {
                assert_eq!(d.name, "return");
                assert_eq!(d.args[1], "https://${host}$request_uri");
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = NginxConfig::parse("http {\n    listen 80;\n").unwrap_err();
        assert!(err.message.contains("expecting '}'"));

        let err = NginxConfig::parse("events {}\n}\n").unwrap_err();
        assert_eq!(err.line, 2);

        let err = NginxConfig::parse("listen 80").unwrap_err();
        assert!(err.message.contains("not terminated"));

        let err = NginxConfig::parse("http {\n  listen 80\n}").unwrap_err();
        assert!(err.message.contains("not terminated"));

        let err = NginxConfig::parse("add_header X \"open").unwrap_err();
        assert_eq!(err.message, "unterminated quoted string");

        assert!(NginxConfig::parse(";").is_err());
    }

    #[test]
    fn test_empty_config() {
        let config = NginxConfig::parse("  \n# nothing here\n").unwrap();
        assert!(config.upstreams().is_empty());
        assert_eq!(config.dump(), "# nothing here\n");
    }

    #[test]
    fn test_first_upstream_mut() {
        let mut config = NginxConfig::parse(
            "http { upstream a { server x:80; } upstream b { server y:80; } }",
        )
        .unwrap();

        let first = config.first_upstream_mut().unwrap();
        assert_eq!(first.args, vec!["a".to_string()]);
    }
}
