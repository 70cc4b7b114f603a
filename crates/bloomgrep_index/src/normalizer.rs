//! Извлечение плоского поискового текста из сырой разметки.
//!
//! Функция обязана давать байт-в-байт одинаковый результат при индексации
//! и при верификации — это инвариант отсутствия ложных отрицаний.

/// Маркер начала тела документа (открывающий тег может нести атрибуты).
const BODY_START: &str = "<body";
/// Маркер конца тела.
const BODY_END: &str = "</body>";

/// Максимальная длина символьной ссылки между `&` и `;`.
const MAX_ENTITY_LEN: usize = 10;

/// Плоская строка для подстрочного поиска: регион тела без тегов,
/// с декодированными ссылками и схлопнутыми пробелами.
/// Нет региона тела — пустая строка, это не ошибка.
pub fn extract_search_text(raw: &str) -> String {
    match body_region(raw) {
        Some(region) => flatten_region(region),
        None => String::new(),
    }
}

/// Посимвольная свёртка регистра. Одна функция на граммы, план запроса и
/// верификацию: расхождение свёрток ломало бы префильтр.
#[inline]
pub fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

pub fn fold_chars(s: &str) -> Vec<char> {
    s.chars().map(fold_char).collect()
}

fn body_region(raw: &str) -> Option<&str> {
    let tag = raw.find(BODY_START)?;
    let after = tag + raw[tag..].find('>')? + 1;
    let end = after + raw[after..].find(BODY_END)?;
    Some(&raw[after..end])
}

#[inline]
fn is_collapsible_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c')
}

/// Один проход по региону: состояние «внутри тега», схлопывание пробелов,
/// декодирование ссылок. Без regex — корпуса большие.
fn flatten_region(region: &str) -> String {
    // дешёвый short-circuit: без `&` ветка декодирования не нужна вовсе
    let decode = region.contains('&');
    let chars: Vec<char> = region.chars().collect();
    let mut out = String::with_capacity(region.len() / 2);
    let mut in_tag = false;
    let mut pending_space = false;
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i];
        if in_tag {
            if ch == '>' {
                in_tag = false;
            }
            i += 1;
            continue;
        }
        match ch {
            '<' => {
                in_tag = true;
                i += 1;
            }
            // CR выбрасывается целиком, даже не как пробел
            '\r' => i += 1,
            c if is_collapsible_ws(c) => {
                if !out.is_empty() {
                    pending_space = true;
                }
                i += 1;
            }
            '&' if decode => match decode_entity(&chars, i) {
                Some((decoded, consumed)) => {
                    flush_space(&mut out, &mut pending_space);
                    out.push(decoded);
                    i += consumed;
                }
                None => {
                    flush_space(&mut out, &mut pending_space);
                    out.push('&');
                    i += 1;
                }
            },
            c => {
                flush_space(&mut out, &mut pending_space);
                out.push(c);
                i += 1;
            }
        }
    }
    // хвостовой pending_space отбрасывается — строка уже без краевых пробелов
    out
}

#[inline]
fn flush_space(out: &mut String, pending: &mut bool) {
    if *pending {
        out.push(' ');
        *pending = false;
    }
}

/// Разбор ссылки, начинающейся в `chars[at] == '&'`.
/// Возвращает (символ, сколько символов съедено) либо None — тогда `&`
/// уходит в выход литералом.
fn decode_entity(chars: &[char], at: usize) -> Option<(char, usize)> {
    let semi = find_semicolon(chars, at + 1)?;
    let body: String = chars[at + 1..semi].iter().collect();
    let consumed = semi - at + 1;
    match body.as_str() {
        "amp" => Some(('&', consumed)),
        "lt" => Some(('<', consumed)),
        "gt" => Some(('>', consumed)),
        "quot" => Some(('"', consumed)),
        "apos" => Some(('\'', consumed)),
        _ if body.starts_with('#') => {
            let code = parse_charref(&body)?;
            if (0xD800..=0xDBFF).contains(&code) {
                // высокий суррогат: валиден только парой со следующей ссылкой
                decode_surrogate_pair(chars, at, semi, code)
            } else {
                char::from_u32(code).map(|c| (c, consumed))
            }
        }
        _ => None,
    }
}

/// Пара численных ссылок D800–DBFF / DC00–DFFF кодирует один символ
/// дополнительной плоскости.
fn decode_surrogate_pair(
    chars: &[char],
    at: usize,
    high_semi: usize,
    high: u32,
) -> Option<(char, usize)> {
    if chars.get(high_semi + 1) != Some(&'&') {
        return None;
    }
    let low_semi = find_semicolon(chars, high_semi + 2)?;
    let low_body: String = chars[high_semi + 2..low_semi].iter().collect();
    let low = parse_charref(&low_body)?;
    if !(0xDC00..=0xDFFF).contains(&low) {
        return None;
    }
    let cp = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
    char::from_u32(cp).map(|c| (c, low_semi - at + 1))
}

fn parse_charref(body: &str) -> Option<u32> {
    let digits = body.strip_prefix('#')?;
    if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        digits.parse::<u32>().ok()
    }
}

fn find_semicolon(chars: &[char], from: usize) -> Option<usize> {
    let to = (from + MAX_ENTITY_LEN).min(chars.len());
    (from..to).find(|&j| chars[j] == ';')
}
