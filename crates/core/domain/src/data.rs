/// 仿真模型中一个可观测/可控测点的标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeSpec {
    /// 模型对象名
    pub object: String,
    /// 对象属性名
    pub attribute: String,
    /// 单位
    pub unit: String,
}

impl AttributeSpec {
    pub fn new(
        object: impl Into<String>,
        attribute: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            attribute: attribute.into(),
            unit: unit.into(),
        }
    }
}

impl std::fmt::Display for AttributeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.object, self.attribute)
    }
}

/// 写命令：向某个测点写入一个原始值。
///
/// 值保持仿真器的原始字符串形态（如 "123.4"、"2.1+0.4i"、"OPEN"），
/// 解释在落库编码层进行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPoint {
    pub spec: AttributeSpec,
    pub value: String,
}

/// 查询返回或异步推送的测点值。
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub object: String,
    pub attribute: String,
    pub value: String,
    pub ts_ms: i64,
}

/// 同步查询的应答体，与推送值同形。
pub type QueryReply = Measurement;
