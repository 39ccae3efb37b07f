//! 落库边界的值编码策略。
//!
//! 仿真器的值是原始字符串，按固定阶梯解释：
//! 1. 可解析为浮点 → 浮点字段；
//! 2. 可识别为复数字面量（尾部 `i`/`j` 标记）→ 幅值 + 相角（度）；
//! 3. 命中固定两项类别表 {"OPEN":0, "CLOSED":1} → 类别码；
//! 4. 其余 → 原样字符串字段。

/// 编码后的测点值。
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    /// 浮点值
    Value { value: f64 },
    /// 复数值：幅值与相角（度）
    Complex { mag: f64, phi: f64 },
    /// 类别码
    State { code: i64 },
    /// 原样字符串
    Text { state: String },
}

/// 按阶梯编码一个原始值。
pub fn encode_value(raw: &str) -> EncodedValue {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<f64>() {
        return EncodedValue::Value { value };
    }
    if let Some((mag, phi)) = parse_complex(raw) {
        return EncodedValue::Complex { mag, phi };
    }
    match raw {
        "OPEN" => EncodedValue::State { code: 0 },
        "CLOSED" => EncodedValue::State { code: 1 },
        other => EncodedValue::Text {
            state: other.to_string(),
        },
    }
}

/// 解析 `a±bi` 形态的复数字面量，返回 (幅值, 相角度数)。
///
/// 尾字符必须是 `i` 或 `j`；虚部缺少系数时按 ±1 处理（"1+i"）。
fn parse_complex(raw: &str) -> Option<(f64, f64)> {
    let body = raw.strip_suffix('i').or_else(|| raw.strip_suffix('j'))?;
    if body.is_empty() {
        return None;
    }

    // 找最后一个不在开头、且不紧跟指数标记的符号位
    let split = body
        .char_indices()
        .rev()
        .find(|(idx, c)| {
            (*c == '+' || *c == '-')
                && *idx > 0
                && !matches!(body.as_bytes()[idx - 1], b'e' | b'E')
        })
        .map(|(idx, _)| idx);

    let (re, im) = match split {
        Some(idx) => {
            let re = body[..idx].parse::<f64>().ok()?;
            let im = parse_imag(&body[idx..])?;
            (re, im)
        }
        None => (0.0, parse_imag(body)?),
    };

    let mag = re.hypot(im);
    let phi = im.atan2(re).to_degrees();
    Some((mag, phi))
}

fn parse_imag(part: &str) -> Option<f64> {
    match part {
        "+" => Some(1.0),
        "-" => Some(-1.0),
        other => other.parse::<f64>().ok(),
    }
}
