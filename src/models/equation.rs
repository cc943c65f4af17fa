//! Reaction-equation parser.
//!
//! Grammar (whitespace ignored):
//!
//! ```text
//! equation := clause (';' clause)*
//! clause   := node (['->'] node)+
//! node     := 'A'..'Z' | 'v'
//! ```
//!
//! Adjacent nodes form a transition with or without an arrow, so `A->B->v`
//! and `ABv` describe the same model. `v` is the untracked ground state and
//! may only end a chain. New species must appear in alphabetical order; a
//! clause after the first must start at a species that already exists.
//! Each transition gets the next lifetime slot in order of appearance.

use crate::error::ValidationError;
use crate::models::kinetic::{KineticModel, MAX_SPECIES, Target, Transition, species_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Species(char),
    Ground,
    Arrow,
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>, ValidationError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((position, ch)) = chars.next() {
        let kind = match ch {
            c if c.is_whitespace() => continue,
            'A'..='Z' => TokenKind::Species(ch),
            'v' => TokenKind::Ground,
            ';' => TokenKind::Separator,
            '-' => match chars.peek() {
                Some((_, '>')) => {
                    chars.next();
                    TokenKind::Arrow
                }
                _ => {
                    return Err(ValidationError::UnexpectedCharacter {
                        found: ch,
                        position,
                    });
                }
            },
            _ => {
                return Err(ValidationError::UnexpectedCharacter {
                    found: ch,
                    position,
                });
            }
        };
        tokens.push(Token { kind, position });
    }
    Ok(tokens)
}

/// Parse a reaction equation into a [`KineticModel`].
pub fn parse_equation(text: &str) -> Result<KineticModel, ValidationError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ValidationError::EmptyEquation);
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        declared: 0,
        grounded: [false; MAX_SPECIES],
        transitions: Vec::new(),
    };
    parser.equation()?;
    KineticModel::from_transitions(parser.declared, parser.transitions)
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Species(usize),
    Ground,
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    declared: usize,
    grounded: [bool; MAX_SPECIES],
    transitions: Vec<Transition>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn equation(&mut self) -> Result<(), ValidationError> {
        self.clause()?;
        while let Some(token) = self.peek() {
            // `clause` only stops at a separator or at the end.
            debug_assert_eq!(token.kind, TokenKind::Separator);
            self.pos += 1;
            self.clause()?;
        }
        Ok(())
    }

    fn clause(&mut self) -> Result<(), ValidationError> {
        let start = match self.peek() {
            None => {
                let position = self.tokens.last().map(|t| t.position + 1).unwrap_or(0);
                return Err(ValidationError::EmptyClause { position });
            }
            Some(token) => token,
        };

        let mut current = match start.kind {
            TokenKind::Species(ch) => {
                self.pos += 1;
                self.clause_start(ch, start.position)?
            }
            TokenKind::Ground => return Err(ValidationError::MisplacedGround { position: start.position }),
            TokenKind::Arrow => return Err(ValidationError::DanglingArrow { position: start.position }),
            TokenKind::Separator => return Err(ValidationError::EmptyClause { position: start.position }),
        };
        let transitions_before = self.transitions.len();

        loop {
            let Some(token) = self.peek() else { break };
            let ch_token = match token.kind {
                TokenKind::Separator => break,
                TokenKind::Arrow => {
                    self.pos += 1;
                    match self.peek() {
                        Some(next) if matches!(next.kind, TokenKind::Species(_) | TokenKind::Ground) => next,
                        _ => return Err(ValidationError::DanglingArrow { position: token.position }),
                    }
                }
                TokenKind::Species(_) | TokenKind::Ground => token,
            };
            self.pos += 1;

            let from = match current {
                Node::Species(s) => s,
                Node::Ground => return Err(ValidationError::MisplacedGround { position: ch_token.position }),
            };
            let next = match ch_token.kind {
                TokenKind::Species(ch) => Node::Species(self.resolve(ch, ch_token.position)?),
                _ => Node::Ground,
            };
            self.push_transition(from, next, ch_token.position)?;
            current = next;
        }

        if self.transitions.len() == transitions_before {
            return Err(ValidationError::EmptyClause { position: start.position });
        }
        Ok(())
    }

    /// First node of a clause: `A` for the very first clause, otherwise an
    /// already declared species.
    fn clause_start(&mut self, ch: char, position: usize) -> Result<Node, ValidationError> {
        let index = letter_index(ch);
        if self.declared == 0 {
            return self.resolve(ch, position).map(Node::Species);
        }
        if index < self.declared {
            Ok(Node::Species(index))
        } else {
            Err(ValidationError::UndeclaredSpecies { found: ch, position })
        }
    }

    /// Existing species, or the next letter of the alphabet (declared here).
    fn resolve(&mut self, ch: char, position: usize) -> Result<usize, ValidationError> {
        let index = letter_index(ch);
        if index < self.declared {
            return Ok(index);
        }
        if self.declared >= MAX_SPECIES {
            return Err(ValidationError::TooManySpecies {
                count: self.declared + 1,
                max: MAX_SPECIES,
            });
        }
        if index != self.declared {
            return Err(ValidationError::SpeciesOutOfOrder {
                found: ch,
                expected: species_label(self.declared),
                position,
            });
        }
        self.declared += 1;
        Ok(index)
    }

    fn push_transition(&mut self, from: usize, to: Node, position: usize) -> Result<(), ValidationError> {
        let target = match to {
            Node::Ground => {
                if self.grounded[from] {
                    return Err(ValidationError::DuplicateGround {
                        species: species_label(from),
                        position,
                    });
                }
                self.grounded[from] = true;
                Target::Ground
            }
            Node::Species(to) if to == from => {
                return Err(ValidationError::SelfTransition {
                    species: species_label(from),
                    position,
                });
            }
            Node::Species(to) => {
                let t = Transition {
                    from,
                    to: Target::Species(to),
                };
                if self.transitions.contains(&t) {
                    return Err(ValidationError::DuplicateTransition {
                        from: species_label(from),
                        to: species_label(to),
                        position,
                    });
                }
                Target::Species(to)
            }
        };
        self.transitions.push(Transition { from, to: target });
        Ok(())
    }
}

fn letter_index(ch: char) -> usize {
    (ch as u8 - b'A') as usize
}
