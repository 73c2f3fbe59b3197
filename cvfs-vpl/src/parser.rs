//! Indentation-aware parser.
//!
//! Parsing never fails as a whole: a line that does not lex or parse becomes a
//! [`StmtKind::Invalid`] statement (taking its indented body with it), and the
//! interpreter reports it when execution reaches that point.

use crate::ast::{Arg, Expr, Program, Stmt, StmtKind};
use crate::error::{VplError, VplResult};
use crate::lexer::{indentation, tokenize, Token};

struct Line {
    number: usize,
    indent: usize,
    tokens: VplResult<Vec<Token>>,
}

/// Parse a whole program
pub fn parse(source: &str) -> Program {
    let lines: Vec<Line> = source
        .lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let tokens = tokenize(raw);
            if matches!(&tokens, Ok(t) if t.is_empty()) {
                return None;
            }
            Some(Line {
                number: i + 1,
                indent: indentation(raw),
                tokens,
            })
        })
        .collect();

    let mut pos = 0;
    let mut body = Vec::new();
    // Templates are often indented as a whole; each run of lines at a lower
    // indentation than the first starts a new top-level block.
    while pos < lines.len() {
        let indent = lines[pos].indent;
        body.extend(parse_block(&lines, &mut pos, indent));
    }
    Program { body }
}

fn parse_block(lines: &[Line], pos: &mut usize, indent: usize) -> Vec<Stmt> {
    let mut out = Vec::new();

    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            out.push(Stmt {
                line: line.number,
                kind: StmtKind::Invalid {
                    message: VplError::syntax("unexpected indentation").to_string(),
                },
            });
            skip_deeper(lines, pos, indent);
            continue;
        }
        *pos += 1;

        let tokens = match &line.tokens {
            Ok(tokens) => tokens,
            Err(e) => {
                out.push(invalid(line.number, e));
                skip_deeper(lines, pos, indent);
                continue;
            }
        };

        let kind = if is_header(tokens) {
            let header = parse_header(tokens);
            let has_body = lines.get(*pos).map_or(false, |next| next.indent > indent);
            let body = if has_body {
                let body_indent = lines[*pos].indent;
                parse_block(lines, pos, body_indent)
            } else {
                Vec::new()
            };
            // Anything still deeper than the header but shallower than the
            // body's first line is malformed; fold it into this statement.
            skip_deeper(lines, pos, indent);

            match header {
                Ok(_) if !has_body => StmtKind::Invalid {
                    message: VplError::syntax("expected an indented block").to_string(),
                },
                Ok(Header::For { var, iterable }) => StmtKind::For { var, iterable, body },
                Ok(Header::If { lhs, rhs }) => StmtKind::If { lhs, rhs, body },
                Err(e) => StmtKind::Invalid { message: e.to_string() },
            }
        } else {
            match parse_simple(tokens) {
                Ok(kind) => kind,
                Err(e) => StmtKind::Invalid { message: e.to_string() },
            }
        };

        out.push(Stmt {
            line: line.number,
            kind,
        });
    }
    out
}

fn invalid(line: usize, e: &VplError) -> Stmt {
    Stmt {
        line,
        kind: StmtKind::Invalid { message: e.to_string() },
    }
}

fn skip_deeper(lines: &[Line], pos: &mut usize, indent: usize) {
    while *pos < lines.len() && lines[*pos].indent > indent {
        *pos += 1;
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(name, "FOR" | "IN" | "IF" | "RETURN")
}

fn is_header(tokens: &[Token]) -> bool {
    matches!(tokens.first(), Some(Token::Ident(k)) if k == "FOR" || k == "IF")
}

enum Header {
    For { var: String, iterable: Expr },
    If { lhs: Expr, rhs: Expr },
}

fn parse_header(tokens: &[Token]) -> VplResult<Header> {
    let mut ts = Tokens::new(tokens);
    let keyword = ts.ident()?;
    let header = if keyword == "FOR" {
        let var = ts.ident()?;
        if is_keyword(&var) {
            return Err(VplError::syntax(format!("{} cannot be a loop variable", var)));
        }
        ts.keyword("IN")?;
        let iterable = ts.expr()?;
        Header::For { var, iterable }
    } else {
        let lhs = ts.expr()?;
        if !ts.eat(&Token::Gt) {
            return Err(VplError::syntax("IF supports only the '>' comparison"));
        }
        let rhs = ts.expr()?;
        Header::If { lhs, rhs }
    };
    ts.expect(&Token::Colon, "':' at end of block header")?;
    ts.end()?;
    Ok(header)
}

fn parse_simple(tokens: &[Token]) -> VplResult<StmtKind> {
    let mut ts = Tokens::new(tokens);

    let kind = match (tokens.first(), tokens.get(1), tokens.get(2)) {
        (Some(Token::Ident(k)), _, _) if k == "RETURN" => {
            ts.advance();
            if ts.at_end() {
                StmtKind::Return(None)
            } else {
                StmtKind::Return(Some(ts.expr()?))
            }
        }
        (Some(Token::Ident(name)), Some(Token::Assign), _) => {
            if is_keyword(name) {
                return Err(VplError::syntax(format!("cannot assign to {}", name)));
            }
            ts.advance();
            ts.advance();
            StmtKind::Assign {
                name: name.clone(),
                value: ts.expr()?,
            }
        }
        (Some(Token::Ident(name)), Some(Token::Dot), Some(Token::Ident(method))) => {
            if method != "append" {
                return Err(VplError::syntax(format!("unknown method .{}()", method)));
            }
            ts.advance();
            ts.advance();
            ts.advance();
            ts.expect(&Token::LParen, "'(' after append")?;
            let value = ts.expr()?;
            ts.expect(&Token::RParen, "')' closing append")?;
            StmtKind::Append {
                name: name.clone(),
                value,
            }
        }
        _ => StmtKind::Expr(ts.expr()?),
    };
    ts.end()?;
    Ok(kind)
}

/// Cursor over one line's tokens
struct Tokens<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> VplResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(VplError::syntax(format!("expected {}, found {}", what, describe(self.peek()))))
        }
    }

    fn end(&self) -> VplResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(VplError::syntax(format!("unexpected {}", describe(self.peek()))))
        }
    }

    fn ident(&mut self) -> VplResult<String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            other => Err(VplError::syntax(format!("expected a name, found {}", describe(other)))),
        }
    }

    fn keyword(&mut self, keyword: &str) -> VplResult<()> {
        match self.advance() {
            Some(Token::Ident(k)) if k == keyword => Ok(()),
            other => Err(VplError::syntax(format!("expected {}, found {}", keyword, describe(other)))),
        }
    }

    fn expr(&mut self) -> VplResult<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.expr()?;
            self.expect(&Token::RBracket, "']'")?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> VplResult<Expr> {
        match self.advance() {
            Some(Token::Number(x)) => Ok(Expr::Number(*x)),
            Some(Token::Str(s)) => Ok(Expr::Str(s.clone())),
            Some(Token::LBracket) => {
                let items = self.comma_list(&Token::RBracket, |ts| ts.expr())?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) if self.peek() == Some(&Token::LParen) => {
                self.advance();
                let args = self.comma_list(&Token::RParen, |ts| ts.arg())?;
                Ok(Expr::Call {
                    function: name.clone(),
                    args,
                })
            }
            Some(Token::Ident(name)) if !is_keyword(name) => Ok(Expr::Var(name.clone())),
            other => Err(VplError::syntax(format!("expected an expression, found {}", describe(other)))),
        }
    }

    fn arg(&mut self) -> VplResult<Arg> {
        if let (Some(Token::Ident(name)), Some(Token::Assign)) = (self.peek(), self.peek_at(1)) {
            self.pos += 2;
            return Ok(Arg {
                name: Some(name.clone()),
                value: self.expr()?,
            });
        }
        Ok(Arg {
            name: None,
            value: self.expr()?,
        })
    }

    /// Items separated by commas up to and including `close`
    fn comma_list<T>(&mut self, close: &Token, mut item: impl FnMut(&mut Self) -> VplResult<T>) -> VplResult<Vec<T>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma, "',' between items")?;
        }
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of line".to_string(),
        Some(Token::Ident(name)) => format!("'{}'", name),
        Some(Token::Number(x)) => format!("number {}", x),
        Some(Token::Str(s)) => format!("string {:?}", s),
        Some(other) => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(program: &Program) -> Vec<&StmtKind> {
        program.body.iter().map(|s| &s.kind).collect()
    }

    #[test]
    fn test_scenario_program() {
        let program = parse("x = LOAD(\"a\")\nRETURN x");
        assert_eq!(
            kinds(&program),
            vec![
                &StmtKind::Assign {
                    name: "x".into(),
                    value: Expr::Call {
                        function: "LOAD".into(),
                        args: vec![Arg {
                            name: None,
                            value: Expr::Str("a".into())
                        }],
                    },
                },
                &StmtKind::Return(Some(Expr::Var("x".into()))),
            ]
        );
        assert_eq!(program.body[1].line, 2);
    }

    #[test]
    fn test_for_block_with_indented_template() {
        let source = "
            # comment line
            out = []
            FOR i IN RANGE(LEN(xs)):
                out.append(xs[i])
                IF xs[i] > 2:
                    RETURN out
            RETURN []
        ";
        let program = parse(source);
        assert_eq!(program.body.len(), 3);
        match &program.body[1].kind {
            StmtKind::For { var, body, .. } => {
                assert_eq!(var, "i");
                assert_eq!(body.len(), 2);
                assert!(matches!(&body[1].kind, StmtKind::If { body, .. } if body.len() == 1));
            }
            other => panic!("expected FOR, got {:?}", other),
        }
        assert_eq!(program.body[2].kind, StmtKind::Return(Some(Expr::List(vec![]))));
    }

    #[test]
    fn test_keyword_arguments() {
        let program = parse("n = HNSW_STEP(q, ef=50)");
        match &program.body[0].kind {
            StmtKind::Assign {
                value: Expr::Call { args, .. },
                ..
            } => {
                assert_eq!(args[0].name, None);
                assert_eq!(args[1].name.as_deref(), Some("ef"));
                assert_eq!(args[1].value, Expr::Number(50.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_lines_become_invalid_statements() {
        let program = parse("a = 1\nb = = 2\nIF a:\n    c = 3\nd = 4\n    e = 5\nf = \"open");
        let k = kinds(&program);
        assert_eq!(k.len(), 6);
        assert!(matches!(k[1], StmtKind::Invalid { .. }));
        // An IF without '>' is invalid and swallows its body.
        assert!(matches!(k[2], StmtKind::Invalid { message } if message.contains(">")));
        assert!(matches!(k[3], StmtKind::Assign { name, .. } if name == "d"));
        assert!(matches!(k[4], StmtKind::Invalid { message } if message.contains("indentation")));
        assert!(matches!(k[5], StmtKind::Invalid { .. }));
    }

    #[test]
    fn test_header_without_body() {
        let program = parse("FOR i IN xs:\nRETURN 1");
        assert!(matches!(&program.body[0].kind, StmtKind::Invalid { message } if message.contains("indented block")));
        assert_eq!(program.body.len(), 2);
    }
}
