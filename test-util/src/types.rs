//! Record types exchanged by the sample services.

use crosstalk::codec::{
    CodecError, CodecResult, Decoder, Encoder, WireValue, decode_record_fields,
};

/// A person. `name`, `height`, and `age` are required attributes; `married`
/// is optional and omitted from the wire when unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub height: f64,
    pub age: i32,
    pub married: Option<bool>,
}

impl WireValue for Person {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) {
        let fields = 3 + usize::from(self.married.is_some());
        enc.begin_record(fields);
        enc.field("name");
        self.name.encode(enc);
        enc.field("height");
        self.height.encode(enc);
        enc.field("age");
        self.age.encode(enc);
        if let Some(married) = self.married {
            enc.field("married");
            married.encode(enc);
        }
        enc.end_record();
    }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> {
        let mut name = None;
        let mut height = None;
        let mut age = None;
        let mut married = None;
        decode_record_fields(dec, |field, dec| match field {
            "name" => {
                name = Some(String::decode(dec)?);
                Ok(true)
            }
            "height" => {
                height = Some(f64::decode(dec)?);
                Ok(true)
            }
            "age" => {
                age = Some(i32::decode(dec)?);
                Ok(true)
            }
            "married" => {
                married = Some(bool::decode(dec)?);
                Ok(true)
            }
            _ => Ok(false),
        })?;
        Ok(Self {
            name: name.ok_or_else(|| CodecError::missing_required("Person", "name"))?,
            height: height.ok_or_else(|| CodecError::missing_required("Person", "height"))?,
            age: age.ok_or_else(|| CodecError::missing_required("Person", "age"))?,
            married,
        })
    }
}

/// A family of [`Person`]s; all attributes required.
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub mother: Person,
    pub father: Person,
    pub children: Vec<Person>,
}

impl WireValue for Family {
    fn encode<E: Encoder + ?Sized>(&self, enc: &mut E) {
        enc.begin_record(3);
        enc.field("mother");
        self.mother.encode(enc);
        enc.field("father");
        self.father.encode(enc);
        enc.field("children");
        self.children.encode(enc);
        enc.end_record();
    }

    fn decode<D: Decoder + ?Sized>(dec: &mut D) -> CodecResult<Self> {
        let mut mother = None;
        let mut father = None;
        let mut children = None;
        decode_record_fields(dec, |field, dec| match field {
            "mother" => {
                mother = Some(Person::decode(dec)?);
                Ok(true)
            }
            "father" => {
                father = Some(Person::decode(dec)?);
                Ok(true)
            }
            "children" => {
                children = Some(Vec::<Person>::decode(dec)?);
                Ok(true)
            }
            _ => Ok(false),
        })?;
        Ok(Self {
            mother: mother.ok_or_else(|| CodecError::missing_required("Family", "mother"))?,
            father: father.ok_or_else(|| CodecError::missing_required("Family", "father"))?,
            children: children
                .ok_or_else(|| CodecError::missing_required("Family", "children"))?,
        })
    }
}
