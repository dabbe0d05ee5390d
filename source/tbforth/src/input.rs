use crate::{
    arena::{Arena, IRAM_CELLS, TIB, TIB_BYTES, TIB_IDX, TIB_LEN, TIB_WORD_IDX, TIB_WORD_LEN},
    word::{RamCell, ARENA_CELL_BYTES},
    Error,
};

/// Location of a token in the current input line.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Token {
    pub offset: usize,
    pub len: usize,
}

impl Token {
    /// The token's text within `line`, if it is in range.
    pub fn text<'a>(&self, line: &'a str) -> Option<&'a str> {
        line.get(self.offset..self.offset + self.len)
    }
}

/// The input line and its cursor, put aside while another source runs.
pub(crate) struct SavedInput([RamCell; IRAM_CELLS - TIB_IDX]);

impl Arena {
    /// Copies `line` into the input buffer and rewinds the cursor.
    pub fn fill_input(&mut self, line: &str) -> Result<(), Error> {
        self.fill_input_bytes(line.as_bytes())
    }

    pub(crate) fn fill_input_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() > TIB_BYTES {
            return Err(Error::InputTooLong(bytes.len()));
        }
        for (i, chunk) in bytes.chunks(ARENA_CELL_BYTES).enumerate() {
            let mut cell = [0u8; ARENA_CELL_BYTES];
            cell[..chunk.len()].copy_from_slice(chunk);
            self.set_field(TIB + i, RamCell::from_le_bytes(cell));
        }
        self.set_field(TIB_IDX, 0);
        self.set_field(TIB_LEN, bytes.len() as RamCell);
        self.set_field(TIB_WORD_IDX, 0);
        self.set_field(TIB_WORD_LEN, 0);
        Ok(())
    }

    pub(crate) fn save_input(&self) -> SavedInput {
        let mut saved = [0; IRAM_CELLS - TIB_IDX];
        for (i, cell) in saved.iter_mut().enumerate() {
            *cell = self.field(TIB_IDX + i);
        }
        SavedInput(saved)
    }

    pub(crate) fn restore_input(&mut self, saved: &SavedInput) {
        for (i, cell) in saved.0.iter().enumerate() {
            self.set_field(TIB_IDX + i, *cell);
        }
    }

    fn tib_byte(&self, idx: usize) -> u8 {
        self.field(TIB + idx / ARENA_CELL_BYTES).to_le_bytes()[idx % ARENA_CELL_BYTES]
    }

    fn input_len(&self) -> usize {
        (self.field(TIB_LEN).max(0) as usize).min(TIB_BYTES)
    }

    /// Next raw character of the input line, if any remain.
    pub fn next_char(&mut self) -> Option<u8> {
        let idx = self.field(TIB_IDX).max(0) as usize;
        if idx >= self.input_len() {
            return None;
        }
        self.set_field(TIB_IDX, idx as RamCell + 1);
        Some(self.tib_byte(idx))
    }

    /// Advances to the next whitespace delimited token.
    ///
    /// The delimiter after the token is consumed too. The token's location is
    /// left in the control block, where it stays after a failed lookup.
    pub fn next_word(&mut self) -> Option<Token> {
        let start = loop {
            let c = self.next_char()?;
            if !c.is_ascii_whitespace() {
                break self.field(TIB_IDX) as usize - 1;
            }
        };
        let mut len = 1;
        while let Some(c) = self.next_char() {
            if c.is_ascii_whitespace() {
                break;
            }
            len += 1;
        }
        self.set_field(TIB_WORD_IDX, start as RamCell);
        self.set_field(TIB_WORD_LEN, len as RamCell);
        Some(Token { offset: start, len })
    }

    /// The most recently read token.
    pub fn token(&self) -> Token {
        Token {
            offset: self.field(TIB_WORD_IDX).max(0) as usize,
            len: self.field(TIB_WORD_LEN).max(0) as usize,
        }
    }

    /// Copies a token's bytes out of the input buffer.
    pub(crate) fn token_bytes<'b>(&self, tok: Token, buf: &'b mut [u8; TIB_BYTES]) -> &'b [u8] {
        let end = (tok.offset + tok.len).min(self.input_len());
        let start = tok.offset.min(end);
        for (i, slot) in buf.iter_mut().take(end - start).enumerate() {
            *slot = self.tib_byte(start + i);
        }
        &buf[..end - start]
    }
}

#[cfg(test)]
mod test {
    use super::Token;
    use crate::{
        arena::{Arena, TIB_BYTES},
        config::Params,
        Error,
    };

    fn words(arena: &mut Arena) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(tok) = arena.next_word() {
            let mut buf = [0u8; TIB_BYTES];
            let bytes = arena.token_bytes(tok, &mut buf);
            out.push(String::from_utf8(bytes.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn tokenizes() {
        let mut arena = Arena::new(&Params::default());
        arena.fill_input("  : square\tdup * ;\n").unwrap();
        assert_eq!(words(&mut arena), [":", "square", "dup", "*", ";"]);
        assert_eq!(arena.next_word(), None);

        arena.fill_input("").unwrap();
        assert_eq!(words(&mut arena), Vec::<String>::new());
    }

    #[test]
    fn token_location_is_kept() {
        let line = "1 2 frob 3";
        let mut arena = Arena::new(&Params::default());
        arena.fill_input(line).unwrap();
        arena.next_word();
        arena.next_word();
        let tok = arena.next_word().unwrap();
        assert_eq!(tok, Token { offset: 4, len: 4 });
        assert_eq!(arena.token(), tok);
        assert_eq!(tok.text(line), Some("frob"));
        // the delimiter after a token is consumed
        assert_eq!(arena.next_char(), Some(b'3'));
    }

    #[test]
    fn saved_input_resumes() {
        let mut arena = Arena::new(&Params::default());
        arena.fill_input("include lib.fs 2 .").unwrap();
        arena.next_word();
        let path = arena.next_word().unwrap();
        let saved = arena.save_input();

        arena.fill_input(": twice dup + ;").unwrap();
        assert_eq!(words(&mut arena).len(), 5);

        arena.restore_input(&saved);
        assert_eq!(arena.token(), path);
        assert_eq!(words(&mut arena), ["2", "."]);
    }

    #[test]
    fn rejects_long_lines() {
        let mut arena = Arena::new(&Params::default());
        let line = "x".repeat(TIB_BYTES + 1);
        assert_eq!(arena.fill_input(&line), Err(Error::InputTooLong(TIB_BYTES + 1)));
        assert!(arena.fill_input(&line[1..]).is_ok());
    }
}
